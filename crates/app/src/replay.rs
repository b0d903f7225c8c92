use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use spark_chat::{
    ConversationId, DisplayMessage, Message, MessagePage, MessageStream, ParticipantId,
    ReconcilerConfig,
};

/// One delivery fed to the reconciler, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayEvent {
    /// Full refetch of the newest page.
    Seed(MessagePage),
    Live(Message),
    /// Result of the viewer's own send.
    Echo(Message),
    Older(MessagePage),
}

impl ReplayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Seed(_) => "seed",
            Self::Live(_) => "live",
            Self::Echo(_) => "echo",
            Self::Older(_) => "older",
        }
    }
}

/// Recorded deliveries for a single conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub conversation: ConversationId,
    #[serde(default)]
    pub viewer: Option<ParticipantId>,
    #[serde(default)]
    pub events: Vec<ReplayEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStep {
    pub event: &'static str,
    pub changed: bool,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub steps: Vec<ReplayStep>,
    pub display: Vec<DisplayMessage>,
    pub has_more: bool,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplayError {
    #[snafu(display("failed to read replay script at {path:?} on `{stage}`: {source}"))]
    ReadScript {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse replay script at {path:?} on `{stage}`: {source}"))]
    ParseScript {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type ReplayResult<T> = Result<T, ReplayError>;

pub fn load_script(path: &Path) -> ReplayResult<ReplayScript> {
    let content = std::fs::read_to_string(path).context(ReadScriptSnafu {
        stage: "read-replay-script",
        path: path.to_path_buf(),
    })?;

    serde_json::from_str(&content).context(ParseScriptSnafu {
        stage: "parse-replay-script",
        path: path.to_path_buf(),
    })
}

pub fn replay(script: &ReplayScript, config: ReconcilerConfig) -> ReplayReport {
    let mut stream = MessageStream::new(script.conversation.clone(), config);
    let mut steps = Vec::with_capacity(script.events.len());

    for event in &script.events {
        let before = stream.revision();
        match event.clone() {
            ReplayEvent::Seed(page) => {
                stream.seed_page(page);
            }
            ReplayEvent::Live(message) => {
                stream.insert_live(message);
            }
            ReplayEvent::Echo(message) => {
                stream.insert_echo(message);
            }
            ReplayEvent::Older(page) => {
                stream.merge_older(page);
            }
        }

        let step = ReplayStep {
            event: event.name(),
            changed: stream.revision() != before,
            len: stream.len(),
        };
        tracing::debug!(
            conversation_id = %script.conversation,
            event = step.event,
            changed = step.changed,
            "replayed event"
        );
        steps.push(step);
    }

    ReplayReport {
        steps,
        display: stream.display(),
        has_more: stream.has_more(),
    }
}

/// `key=value` line for one displayed message.
pub fn describe(message: &DisplayMessage, viewer: Option<&ParticipantId>) -> String {
    let own = viewer.is_some_and(|viewer| message.is_own(viewer));
    format!(
        "id={} sender={} sent_at={} first={} last={} own={} text={:?}",
        message.id(),
        message.message.sender_id,
        message.message.sent_at.to_rfc3339(),
        message.is_first_in_group,
        message.is_last_in_group,
        own,
        message.message.text
    )
}
