#![deny(unsafe_code)]

//! Chat view core: reconciles history pages, local echoes and live messages for
//! one conversation into an ordered, grouped display sequence.

/// Backend contract and the scriptable in-memory backend.
pub mod api;
pub mod composer;
pub mod error;
/// Neighbor-based visual grouping of sorted messages.
pub mod grouping;
pub mod ids;
pub mod message;
/// Duplicate-free working set of one conversation.
pub mod reconciler;
pub mod scroll;
/// Async driver that owns a chat view's state.
pub mod session;

pub use api::{
    ApiError, ApiResult, BoxFuture, InMemoryApi, MessageApi, MessageSubscription, SendRequest,
};
pub use composer::Composer;
pub use error::{ChatError, ChatResult};
pub use grouping::{GROUP_GAP, annotate};
pub use ids::{ConversationId, MessageId, ParticipantId};
pub use message::{
    Attachment, DisplayMessage, Message, MessagePage, SenderProfile, SenderSummary,
};
pub use reconciler::{MergeOutcome, MessageStream, Origin, ReconcilerConfig};
pub use scroll::{SCROLL_FOLLOW_THRESHOLD, ScrollFollow, Viewport};
pub use session::{ChatSession, SessionConfig, SessionSnapshot};
