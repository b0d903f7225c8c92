use std::sync::Arc;

use futures::StreamExt;
use snafu::IntoError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::api::{ApiError, ApiResult, MessageApi, MessageSubscription, SendRequest};
use crate::composer::Composer;
use crate::error::{ChatResult, SendFailedSnafu, SessionClosedSnafu};
use crate::ids::{ConversationId, ParticipantId};
use crate::message::{Attachment, DisplayMessage, Message, MessagePage};
use crate::reconciler::{MergeOutcome, MessageStream, ReconcilerConfig};
use crate::scroll::{SCROLL_FOLLOW_THRESHOLD, ScrollFollow, Viewport};

/// Per-view tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub reconciler: ReconcilerConfig,
    pub scroll_follow_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            scroll_follow_threshold: SCROLL_FOLLOW_THRESHOLD,
        }
    }
}

/// Render-ready state published after every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation_id: ConversationId,
    pub viewer: ParticipantId,
    pub messages: Vec<DisplayMessage>,
    pub has_more: bool,
    /// Set once the first history page has been applied.
    pub loaded: bool,
    pub draft: String,
    pub sending: bool,
    /// Increments each time the view should jump to the newest message.
    pub scroll_requests: u64,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    fn empty(conversation_id: ConversationId, viewer: ParticipantId) -> Self {
        Self {
            conversation_id,
            viewer,
            messages: Vec::new(),
            has_more: false,
            loaded: false,
            draft: String::new(),
            sending: false,
            scroll_requests: 0,
            last_error: None,
        }
    }
}

#[derive(Debug)]
enum Command {
    Refetch,
    LoadOlder,
    SetDraft(String),
    Send {
        attachments: Vec<Attachment>,
        reply: oneshot::Sender<ChatResult<Message>>,
    },
    Viewport(Viewport),
    JumpToNewest,
    Close,
}

enum Completion {
    Seed {
        request: u64,
        result: ApiResult<MessagePage>,
    },
    Older(ApiResult<MessagePage>),
    Subscribed(ApiResult<MessageSubscription>),
    Sent {
        result: ApiResult<Message>,
        reply: oneshot::Sender<ChatResult<Message>>,
    },
}

/// Handle to one open chat view.
///
/// A single task owns the working set and processes loads, live messages, sends
/// and commands one at a time. Closing or dropping the handle stops the task and
/// aborts in-flight requests, so nothing that resolves afterwards reaches the view.
pub struct ChatSession {
    conversation_id: ConversationId,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Opens the view; must be called from within a tokio runtime.
    pub fn open(
        api: Arc<dyn MessageApi>,
        conversation_id: ConversationId,
        viewer: ParticipantId,
        config: SessionConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::empty(
            conversation_id.clone(),
            viewer.clone(),
        ));

        let worker = SessionWorker::new(api, conversation_id.clone(), viewer, config, snapshot_tx);
        let task = tokio::spawn(worker.run(command_rx));
        tracing::info!(conversation_id = %conversation_id, "opened chat session");

        Self {
            conversation_id,
            commands: command_tx,
            snapshots: snapshot_rx,
            task: Some(task),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Waits for the next published snapshot.
    pub async fn changed(&mut self) -> ChatResult<SessionSnapshot> {
        if self.snapshots.changed().await.is_err() {
            return self.closed_error("session-changed");
        }
        Ok(self.snapshots.borrow_and_update().clone())
    }

    /// Waits until `predicate` holds for the current or a later snapshot.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> ChatResult<SessionSnapshot> {
        let matched = self
            .snapshots
            .wait_for(predicate)
            .await
            .map(|snapshot| snapshot.clone());
        match matched {
            Ok(snapshot) => Ok(snapshot),
            Err(_) => self.closed_error("session-wait-for"),
        }
    }

    pub fn refetch(&self) -> ChatResult<()> {
        self.command(Command::Refetch, "session-refetch")
    }

    pub fn load_older(&self) -> ChatResult<()> {
        self.command(Command::LoadOlder, "session-load-older")
    }

    pub fn set_draft(&self, text: impl Into<String>) -> ChatResult<()> {
        self.command(Command::SetDraft(text.into()), "session-set-draft")
    }

    pub fn update_viewport(&self, viewport: Viewport) -> ChatResult<()> {
        self.command(Command::Viewport(viewport), "session-update-viewport")
    }

    pub fn jump_to_newest(&self) -> ChatResult<()> {
        self.command(Command::JumpToNewest, "session-jump-to-newest")
    }

    /// Sends the current draft. Resolves once the backend accepted or rejected it.
    pub async fn send(&self, attachments: Vec<Attachment>) -> ChatResult<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(
            Command::Send {
                attachments,
                reply: reply_tx,
            },
            "session-send",
        )?;

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => self.closed_error("session-send-reply"),
        }
    }

    /// Closes the view and waits for the session task to stop.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take()
            && let Err(error) = task.await
        {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                error = %error,
                "chat session task ended abnormally"
            );
        }
    }

    fn command(&self, command: Command, stage: &'static str) -> ChatResult<()> {
        if self.commands.send(command).is_err() {
            return self.closed_error(stage);
        }
        Ok(())
    }

    fn closed_error<T>(&self, stage: &'static str) -> ChatResult<T> {
        SessionClosedSnafu {
            stage,
            conversation_id: self.conversation_id.to_string(),
        }
        .fail()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct SessionWorker {
    api: Arc<dyn MessageApi>,
    viewer: ParticipantId,
    stream: MessageStream,
    scroll: ScrollFollow,
    composer: Composer,
    loaded: bool,
    older_in_flight: bool,
    seed_requests: u64,
    scroll_requests: u64,
    last_error: Option<String>,
    closed: bool,
    tasks: JoinSet<Completion>,
    subscription: Option<MessageSubscription>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionWorker {
    fn new(
        api: Arc<dyn MessageApi>,
        conversation_id: ConversationId,
        viewer: ParticipantId,
        config: SessionConfig,
        snapshots: watch::Sender<SessionSnapshot>,
    ) -> Self {
        Self {
            api,
            viewer,
            stream: MessageStream::new(conversation_id, config.reconciler),
            scroll: ScrollFollow::with_threshold(config.scroll_follow_threshold),
            composer: Composer::new(),
            loaded: false,
            older_in_flight: false,
            seed_requests: 0,
            scroll_requests: 0,
            last_error: None,
            closed: false,
            tasks: JoinSet::new(),
            subscription: None,
            snapshots,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.spawn_seed();
        self.spawn_subscribe();

        // Once closed, no further completion or live item is handled.
        while !self.closed {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.closed = true,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(completion) => self.handle_completion(completion),
                    Err(error) => tracing::warn!(
                        conversation_id = %self.stream.conversation_id(),
                        error = %error,
                        "chat session request task failed"
                    ),
                },
                live = next_live(&mut self.subscription) => self.handle_live(live),
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.subscription = None;
        self.tasks.abort_all();
        tracing::info!(
            conversation_id = %self.stream.conversation_id(),
            "closed chat session"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refetch => self.spawn_seed(),
            Command::LoadOlder => self.spawn_older(),
            Command::SetDraft(text) => {
                self.composer.set_draft(text);
                self.publish(false);
            }
            Command::Send { attachments, reply } => self.begin_send(attachments, reply),
            Command::Viewport(viewport) => self.scroll.update_viewport(viewport),
            Command::JumpToNewest => {
                self.scroll.request_scroll_to_bottom();
                self.reconcile(|_| ());
            }
            Command::Close => self.closed = true,
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Seed { request, result } => self.apply_seed(request, result),
            Completion::Older(result) => self.apply_older(result),
            Completion::Subscribed(Ok(subscription)) => {
                tracing::debug!(
                    conversation_id = %self.stream.conversation_id(),
                    "live subscription established"
                );
                self.subscription = Some(subscription);
            }
            Completion::Subscribed(Err(error)) => {
                tracing::warn!(
                    conversation_id = %self.stream.conversation_id(),
                    error = %error,
                    "failed to open live subscription"
                );
                self.record_error(&error);
                self.publish(false);
            }
            Completion::Sent { result, reply } => self.finish_send(result, reply),
        }
    }

    fn handle_live(&mut self, live: Option<ApiResult<Message>>) {
        match live {
            Some(Ok(message)) => {
                self.reconcile(|stream| {
                    stream.insert_live(message);
                });
            }
            Some(Err(error)) => {
                tracing::warn!(
                    conversation_id = %self.stream.conversation_id(),
                    error = %error,
                    "live subscription delivered an error"
                );
                self.record_error(&error);
                self.publish(false);
            }
            None => {
                tracing::info!(
                    conversation_id = %self.stream.conversation_id(),
                    "live subscription ended"
                );
                self.subscription = None;
            }
        }
    }

    fn spawn_seed(&mut self) {
        self.seed_requests += 1;
        let request = self.seed_requests;
        let api = Arc::clone(&self.api);
        let conversation_id = self.stream.conversation_id().clone();
        self.tasks.spawn(async move {
            let result = api.fetch_page(&conversation_id, None).await;
            Completion::Seed { request, result }
        });
    }

    fn spawn_older(&mut self) {
        if self.older_in_flight || !self.stream.has_more() {
            return;
        }
        let Some(cursor) = self.stream.oldest_id().cloned() else {
            return;
        };

        self.older_in_flight = true;
        let api = Arc::clone(&self.api);
        let conversation_id = self.stream.conversation_id().clone();
        self.tasks.spawn(async move {
            let result = api.fetch_page(&conversation_id, Some(&cursor)).await;
            Completion::Older(result)
        });
    }

    fn spawn_subscribe(&mut self) {
        let api = Arc::clone(&self.api);
        let conversation_id = self.stream.conversation_id().clone();
        self.tasks.spawn(async move {
            let result = api.subscribe(&conversation_id).await;
            Completion::Subscribed(result)
        });
    }

    fn apply_seed(&mut self, request: u64, result: ApiResult<MessagePage>) {
        if request != self.seed_requests {
            tracing::debug!(
                conversation_id = %self.stream.conversation_id(),
                request,
                latest = self.seed_requests,
                "dropped superseded history load"
            );
            return;
        }

        match result {
            Ok(page) => {
                self.loaded = true;
                self.last_error = None;
                self.reconcile(|stream| {
                    stream.seed_page(page);
                });
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %self.stream.conversation_id(),
                    error = %error,
                    "failed to load message history"
                );
                self.record_error(&error);
                self.publish(false);
            }
        }
    }

    fn apply_older(&mut self, result: ApiResult<MessagePage>) {
        self.older_in_flight = false;
        match result {
            Ok(page) => {
                // Prepending history must not yank a reader to the bottom.
                self.scroll.begin_pass();
                self.stream.merge_older(page);
                self.scroll.finish_pass(false);
                self.publish(false);
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %self.stream.conversation_id(),
                    error = %error,
                    "failed to load older messages"
                );
                self.record_error(&error);
                self.publish(false);
            }
        }
    }

    fn begin_send(
        &mut self,
        attachments: Vec<Attachment>,
        reply: oneshot::Sender<ChatResult<Message>>,
    ) {
        let text = match self.composer.begin_send() {
            Ok(text) => text,
            Err(error) => {
                let _ = reply.send(Err(error));
                return;
            }
        };
        self.publish(false);

        let api = Arc::clone(&self.api);
        let request = SendRequest::new(self.stream.conversation_id().clone(), text)
            .with_attachments(attachments);
        self.tasks.spawn(async move {
            let result = api.send(request).await;
            Completion::Sent { result, reply }
        });
    }

    fn finish_send(
        &mut self,
        result: ApiResult<Message>,
        reply: oneshot::Sender<ChatResult<Message>>,
    ) {
        match result {
            Ok(message) => {
                self.composer.finish_send(true);
                self.last_error = None;
                let echo = message.clone();
                let outcome = self.reconcile(|stream| stream.insert_echo(echo));
                if outcome == MergeOutcome::ForeignConversation {
                    tracing::warn!(
                        conversation_id = %self.stream.conversation_id(),
                        message_id = %message.id,
                        "send result belongs to another conversation"
                    );
                }
                let _ = reply.send(Ok(message));
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %self.stream.conversation_id(),
                    error = %error,
                    "failed to send message"
                );
                self.composer.finish_send(false);
                self.record_error(&error);
                self.publish(false);
                let _ = reply.send(Err(SendFailedSnafu {
                    stage: "session-send",
                }
                .into_error(error)));
            }
        }
    }

    /// Runs one reconciliation pass and publishes the result.
    fn reconcile<R>(&mut self, mutate: impl FnOnce(&mut MessageStream) -> R) -> R {
        self.scroll.begin_pass();
        let before = self.stream.revision();
        let outcome = mutate(&mut self.stream);
        let changed = self.stream.revision() != before;
        let scroll_to_bottom = self.scroll.finish_pass(changed);
        self.publish(scroll_to_bottom);
        outcome
    }

    fn record_error(&mut self, error: &ApiError) {
        self.last_error = Some(error.to_string());
    }

    fn publish(&mut self, scroll_to_bottom: bool) {
        if scroll_to_bottom {
            self.scroll_requests += 1;
        }

        let snapshot = SessionSnapshot {
            conversation_id: self.stream.conversation_id().clone(),
            viewer: self.viewer.clone(),
            messages: self.stream.display(),
            has_more: self.stream.has_more(),
            loaded: self.loaded,
            draft: self.composer.draft().to_string(),
            sending: self.composer.is_sending(),
            scroll_requests: self.scroll_requests,
            last_error: self.last_error.clone(),
        };
        self.snapshots.send_replace(snapshot);
    }
}

async fn next_live(subscription: &mut Option<MessageSubscription>) -> Option<ApiResult<Message>> {
    match subscription {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
