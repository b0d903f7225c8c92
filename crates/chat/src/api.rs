use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, BoxStream};
use snafu::Snafu;
use tokio::sync::broadcast;

use crate::ids::{ConversationId, MessageId, ParticipantId};
use crate::message::{Attachment, Message, MessagePage};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ApiResult<T> = Result<T, ApiError>;
/// Live messages pushed for one subscription until the stream is dropped.
pub type MessageSubscription = BoxStream<'static, ApiResult<Message>>;

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("transport failed on `{stage}`: {details}"))]
    Transport {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("request rejected on `{stage}`: {details}"))]
    Rejected {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("request on `{stage}` is not authorized"))]
    Unauthorized { stage: &'static str },
}

/// Payload of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub conversation_id: ConversationId,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl SendRequest {
    pub fn new(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Backend operations the chat view consumes.
pub trait MessageApi: Send + Sync {
    /// Newest page of history, or the page strictly older than `before`.
    fn fetch_page<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        before: Option<&'a MessageId>,
    ) -> BoxFuture<'a, ApiResult<MessagePage>>;

    fn subscribe<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ApiResult<MessageSubscription>>;

    /// Resolves to the created message; an error means nothing was created.
    fn send<'a>(&'a self, request: SendRequest) -> BoxFuture<'a, ApiResult<Message>>;
}

pub const IN_MEMORY_PAGE_SIZE: usize = 50;
const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Scriptable backend used by the runner and tests.
///
/// Every subscriber shares one live channel regardless of conversation, the way a
/// multiplexed socket can deliver events for a conversation the view already left.
pub struct InMemoryApi {
    viewer: ParticipantId,
    page_size: usize,
    history: Mutex<HashMap<ConversationId, Vec<Message>>>,
    live_tx: broadcast::Sender<Message>,
    send_failures: Mutex<VecDeque<ApiError>>,
    fetch_failures: Mutex<VecDeque<ApiError>>,
    send_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    loop_back_sends: bool,
    next_message_id: AtomicU64,
    clock: Option<(DateTime<Utc>, TimeDelta)>,
    clock_ticks: AtomicU64,
}

impl InMemoryApi {
    pub fn new(viewer: ParticipantId) -> Self {
        let (live_tx, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            viewer,
            page_size: IN_MEMORY_PAGE_SIZE,
            history: Mutex::new(HashMap::new()),
            live_tx,
            send_failures: Mutex::new(VecDeque::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            send_delay: None,
            fetch_delay: None,
            loop_back_sends: true,
            next_message_id: AtomicU64::new(1),
            clock: None,
            clock_ticks: AtomicU64::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Sent messages are also pushed to live subscribers unless disabled.
    pub fn with_loop_back(mut self, loop_back_sends: bool) -> Self {
        self.loop_back_sends = loop_back_sends;
        self
    }

    /// Stamps sent messages at `start`, `start + step`, ... instead of wall time.
    pub fn with_fixed_clock(mut self, start: DateTime<Utc>, step: TimeDelta) -> Self {
        self.clock = Some((start, step));
        self
    }

    pub fn viewer(&self) -> &ParticipantId {
        &self.viewer
    }

    pub fn insert_history(&self, messages: impl IntoIterator<Item = Message>) {
        let mut history = lock(&self.history);
        for message in messages {
            history
                .entry(message.conversation_id.clone())
                .or_default()
                .push(message);
        }
        for thread in history.values_mut() {
            thread.sort_by_key(|message| message.sent_at);
        }
    }

    /// Pushes a message to live subscribers. Returns the number of receivers.
    pub fn publish_live(&self, message: Message) -> usize {
        self.live_tx.send(message).unwrap_or(0)
    }

    pub fn live_subscriber_count(&self) -> usize {
        self.live_tx.receiver_count()
    }

    pub fn fail_next_send(&self, error: ApiError) {
        lock(&self.send_failures).push_back(error);
    }

    pub fn fail_next_fetch(&self, error: ApiError) {
        lock(&self.fetch_failures).push_back(error);
    }

    fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Some((start, step)) => {
                let tick = self.clock_ticks.fetch_add(1, Ordering::SeqCst);
                start + step * i32::try_from(tick).unwrap_or(i32::MAX)
            }
            None => Utc::now(),
        }
    }

    fn page_of(&self, conversation_id: &ConversationId, before: Option<&MessageId>) -> MessagePage {
        let history = lock(&self.history);
        let Some(thread) = history.get(conversation_id) else {
            return MessagePage::default();
        };

        let end = match before {
            Some(cursor) => thread
                .iter()
                .position(|message| &message.id == cursor)
                .unwrap_or(0),
            None => thread.len(),
        };
        let start = end.saturating_sub(self.page_size);

        MessagePage::new(thread[start..end].to_vec(), start > 0)
    }
}

impl MessageApi for InMemoryApi {
    fn fetch_page<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        before: Option<&'a MessageId>,
    ) -> BoxFuture<'a, ApiResult<MessagePage>> {
        Box::pin(async move {
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            let scripted_failure = lock(&self.fetch_failures).pop_front();
            if let Some(error) = scripted_failure {
                return Err(error);
            }
            Ok(self.page_of(conversation_id, before))
        })
    }

    fn subscribe<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, ApiResult<MessageSubscription>> {
        Box::pin(async move {
            tracing::debug!(conversation_id = %conversation_id, "opened in-memory subscription");
            let receiver = self.live_tx.subscribe();
            let subscription = stream::unfold(receiver, |mut receiver| async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((Ok(message), receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "live subscriber lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            });
            Ok(Box::pin(subscription) as MessageSubscription)
        })
    }

    fn send<'a>(&'a self, request: SendRequest) -> BoxFuture<'a, ApiResult<Message>> {
        Box::pin(async move {
            if let Some(delay) = self.send_delay {
                tokio::time::sleep(delay).await;
            }
            let scripted_failure = lock(&self.send_failures).pop_front();
            if let Some(error) = scripted_failure {
                return Err(error);
            }
            if request.text.trim().is_empty() && request.attachments.is_empty() {
                return RejectedSnafu {
                    stage: "in-memory-send",
                    details: "message has neither text nor attachments".to_string(),
                }
                .fail();
            }

            let raw_id = format!("m{}", self.next_message_id.fetch_add(1, Ordering::SeqCst));
            let id = MessageId::parse(&raw_id).map_err(|error| ApiError::Rejected {
                stage: "in-memory-send-id",
                details: error.to_string(),
            })?;
            let message = Message::new(
                id,
                request.conversation_id,
                self.viewer.clone(),
                request.text,
                self.now(),
            )
            .with_attachments(request.attachments);

            self.insert_history([message.clone()]);
            if self.loop_back_sends {
                self.publish_live(message.clone());
            }
            Ok(message)
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
