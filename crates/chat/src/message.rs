use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, ParticipantId};

/// Name shown when a sender has neither a profile display name nor a username.
pub const FALLBACK_SENDER_NAME: &str = "User";

/// Media attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: kind.into(),
        }
    }
}

/// Public profile fields nested under a sender.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

/// Author details delivered alongside a message for avatar and name rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderSummary {
    pub id: ParticipantId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub profile: Option<SenderProfile>,
}

impl SenderSummary {
    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|profile| profile.display_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| Some(self.username.trim()).filter(|name| !name.is_empty()))
            .unwrap_or(FALLBACK_SENDER_NAME)
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .and_then(|profile| profile.photos.first())
            .map(String::as_str)
    }
}

/// Immutable message record as delivered by the query, subscription or send result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "matchId")]
    pub conversation_id: ConversationId,
    pub sender_id: ParticipantId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub sender: Option<SenderSummary>,
    #[serde(default)]
    pub read_by: Vec<ParticipantId>,
    #[serde(default)]
    pub edited: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: ParticipantId,
        text: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            text: text.into(),
            attachments: Vec::new(),
            sent_at,
            sender: None,
            read_by: Vec::new(),
            edited: false,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_sender(mut self, sender: SenderSummary) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn sender_name(&self) -> &str {
        self.sender
            .as_ref()
            .map(SenderSummary::display_name)
            .unwrap_or(FALLBACK_SENDER_NAME)
    }
}

/// Message annotated with visual grouping metadata. Recomputed on every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMessage {
    #[serde(flatten)]
    pub message: Message,
    pub is_first_in_group: bool,
    pub is_last_in_group: bool,
}

impl DisplayMessage {
    pub fn id(&self) -> &MessageId {
        &self.message.id
    }

    /// Alignment hint only; grouping never looks at the viewer.
    pub fn is_own(&self, viewer: &ParticipantId) -> bool {
        &self.message.sender_id == viewer
    }
}

/// One page of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub has_more: bool,
}

impl MessagePage {
    pub fn new(messages: Vec<Message>, has_more: bool) -> Self {
        Self { messages, has_more }
    }
}
