#![deny(unsafe_code)]

//! Client-side authentication readiness: one state machine resolved from durable
//! storage at startup, a route guard that waits on it, and the bearer header.

pub mod error;
/// Route access rules evaluated against readiness.
pub mod guard;
pub mod readiness;
/// Durable `auth-storage.json` envelope.
pub mod storage;
pub mod store;

pub use error::{AuthError, AuthResult};
pub use guard::{Route, RouteDecision, RouteGuard};
pub use readiness::{
    ADMIN_ROLE, AuthReadiness, AuthSession, AuthUser, UserProfile, authorization_header,
};
pub use storage::{AuthSnapshot, default_auth_path};
pub use store::{AuthStore, AuthWatch};
