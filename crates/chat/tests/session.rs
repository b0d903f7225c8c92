use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use spark_chat::{
    ApiError, ChatError, ChatSession, ConversationId, InMemoryApi, Message, MessageId,
    ParticipantId, SessionConfig, SessionSnapshot, Viewport,
};

const WAIT: Duration = Duration::from_secs(5);

fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, second).unwrap()
}

fn conversation(raw: &str) -> ConversationId {
    ConversationId::parse(raw).unwrap()
}

fn participant(raw: &str) -> ParticipantId {
    ParticipantId::parse(raw).unwrap()
}

fn message(conversation_id: &str, id: &str, sender: &str, sent_at: DateTime<Utc>) -> Message {
    Message::new(
        MessageId::parse(id).unwrap(),
        conversation(conversation_id),
        participant(sender),
        format!("text {id}"),
        sent_at,
    )
}

fn ids(snapshot: &SessionSnapshot) -> Vec<String> {
    snapshot
        .messages
        .iter()
        .map(|entry| entry.id().to_string())
        .collect()
}

fn has_id(snapshot: &SessionSnapshot, id: &str) -> bool {
    snapshot.messages.iter().any(|entry| entry.id().as_str() == id)
}

async fn wait_until(
    session: &mut ChatSession,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(WAIT, session.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("session closed while waiting")
}

async fn wait_for_subscriber(api: &InMemoryApi) {
    tokio::time::timeout(WAIT, async {
        while api.live_subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("subscription never opened");
}

fn open(api: &Arc<InMemoryApi>, conversation_id: &str) -> ChatSession {
    let viewer = api.viewer().clone();
    ChatSession::open(
        api.clone(),
        conversation(conversation_id),
        viewer,
        SessionConfig::default(),
    )
}

#[tokio::test]
async fn walkthrough_merges_history_echo_and_live_update() {
    let api = Arc::new(
        InMemoryApi::new(participant("u2"))
            .with_loop_back(false)
            .with_fixed_clock(at(10, 0, 2), TimeDelta::seconds(1)),
    );
    api.insert_history([message("a", "1", "u1", at(10, 0, 0))]);

    let mut session = open(&api, "a");
    wait_until(&mut session, |snapshot| snapshot.loaded).await;
    wait_for_subscriber(&api).await;

    session.set_draft("hi there").unwrap();
    let echo = session.send(Vec::new()).await.unwrap();
    assert_eq!(echo.sent_at, at(10, 0, 2));

    api.publish_live(message("a", "3", "u2", at(10, 4, 0)));
    let snapshot = wait_until(&mut session, |snapshot| has_id(snapshot, "3")).await;

    assert_eq!(ids(&snapshot), vec!["1", echo.id.as_str(), "3"]);
    let [first, second, third] = &snapshot.messages[..] else {
        panic!("expected three messages");
    };
    assert!(first.is_first_in_group && first.is_last_in_group);
    assert!(second.is_first_in_group && !second.is_last_in_group);
    assert!(!third.is_first_in_group && third.is_last_in_group);
    assert!(second.is_own(&participant("u2")));
    assert!(!first.is_own(&participant("u2")));

    session.close().await;
}

#[tokio::test]
async fn echo_followed_by_subscription_copy_shows_once() {
    let api = Arc::new(InMemoryApi::new(participant("u1")));
    let mut session = open(&api, "a");
    wait_until(&mut session, |snapshot| snapshot.loaded).await;
    wait_for_subscriber(&api).await;

    session.set_draft("hello").unwrap();
    let sent = session.send(Vec::new()).await.unwrap();

    // The loop-back copy was queued before this marker, so it has been handled
    // by the time the marker shows up.
    api.publish_live(message("a", "marker", "u2", Utc::now() + TimeDelta::hours(1)));
    let snapshot = wait_until(&mut session, |snapshot| has_id(snapshot, "marker")).await;

    let copies = snapshot
        .messages
        .iter()
        .filter(|entry| entry.id() == &sent.id)
        .count();
    assert_eq!(copies, 1);
    assert_eq!(snapshot.messages.len(), 2);
    assert!(!snapshot.sending);
    assert_eq!(snapshot.draft, "");

    session.close().await;
}

#[tokio::test]
async fn live_update_for_other_conversation_is_ignored() {
    let api = Arc::new(InMemoryApi::new(participant("u1")));
    api.insert_history([message("a", "1", "u1", at(10, 0, 0))]);

    let mut session = open(&api, "a");
    wait_until(&mut session, |snapshot| snapshot.loaded).await;
    wait_for_subscriber(&api).await;

    api.publish_live(message("b", "stray", "u9", at(10, 0, 5)));
    api.publish_live(message("a", "2", "u2", at(10, 0, 10)));
    let snapshot = wait_until(&mut session, |snapshot| has_id(snapshot, "2")).await;

    assert_eq!(ids(&snapshot), vec!["1", "2"]);
    session.close().await;
}

#[tokio::test]
async fn failed_send_restores_draft_and_inserts_nothing() {
    let api = Arc::new(InMemoryApi::new(participant("u1")));
    api.insert_history([message("a", "1", "u2", at(10, 0, 0))]);
    api.fail_next_send(ApiError::Transport {
        stage: "test",
        details: "offline".to_string(),
    });

    let mut session = open(&api, "a");
    wait_until(&mut session, |snapshot| snapshot.loaded).await;

    session.set_draft("  see you soon ").unwrap();
    let error = session.send(Vec::new()).await.unwrap_err();
    assert!(matches!(error, ChatError::SendFailed { .. }));

    let snapshot = wait_until(&mut session, |snapshot| !snapshot.sending).await;
    assert_eq!(snapshot.draft, "see you soon");
    assert_eq!(ids(&snapshot), vec!["1"]);
    assert!(snapshot.last_error.is_some());

    // Retry goes through with the restored text.
    let sent = session.send(Vec::new()).await.unwrap();
    assert_eq!(sent.text, "see you soon");
    session.close().await;
}

#[tokio::test]
async fn empty_draft_is_refused_without_calling_backend() {
    let api = Arc::new(InMemoryApi::new(participant("u1")));
    let session = open(&api, "a");

    session.set_draft("   ").unwrap();
    let error = session.send(Vec::new()).await.unwrap_err();
    assert!(matches!(error, ChatError::EmptyMessage { .. }));
    session.close().await;
}

#[tokio::test]
async fn nothing_reaches_the_view_after_close() {
    let api = Arc::new(
        InMemoryApi::new(participant("u1")).with_fetch_delay(Duration::from_millis(50)),
    );
    api.insert_history([message("a", "1", "u2", at(10, 0, 0))]);

    let session = open(&api, "a");
    let mut watcher = session.watch();
    session.close().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.publish_live(message("a", "2", "u2", at(10, 0, 1))), 0);

    let snapshot = watcher.borrow_and_update().clone();
    assert!(!snapshot.loaded);
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.scroll_requests, 0);
    assert!(watcher.changed().await.is_err());
}

#[tokio::test]
async fn dropping_the_handle_stops_the_session() {
    let api = Arc::new(InMemoryApi::new(participant("u1")));
    let session = open(&api, "a");
    let mut watcher = session.watch();
    drop(session);

    tokio::time::timeout(WAIT, async {
        while watcher.changed().await.is_ok() {}
    })
    .await
    .expect("session task kept running after the handle was dropped");
}

#[tokio::test]
async fn reader_scrolled_back_is_not_pulled_to_bottom() {
    let api = Arc::new(InMemoryApi::new(participant("u1")));
    api.insert_history([message("a", "1", "u2", at(10, 0, 0))]);

    let mut session = open(&api, "a");
    let loaded = wait_until(&mut session, |snapshot| snapshot.loaded).await;
    assert_eq!(loaded.scroll_requests, 1);
    wait_for_subscriber(&api).await;

    session
        .update_viewport(Viewport::new(0.0, 600.0, 3_000.0))
        .unwrap();
    session.set_draft("reviewing").unwrap();
    wait_until(&mut session, |snapshot| snapshot.draft == "reviewing").await;

    api.publish_live(message("a", "2", "u2", at(10, 1, 0)));
    let snapshot = wait_until(&mut session, |snapshot| has_id(snapshot, "2")).await;
    assert_eq!(snapshot.scroll_requests, 1);

    session
        .update_viewport(Viewport::new(2_300.0, 600.0, 3_000.0))
        .unwrap();
    session.set_draft("following").unwrap();
    wait_until(&mut session, |snapshot| snapshot.draft == "following").await;

    api.publish_live(message("a", "3", "u2", at(10, 2, 0)));
    let snapshot = wait_until(&mut session, |snapshot| has_id(snapshot, "3")).await;
    assert_eq!(snapshot.scroll_requests, 2);

    session.jump_to_newest().unwrap();
    let snapshot = wait_until(&mut session, |snapshot| snapshot.scroll_requests == 3).await;
    assert_eq!(snapshot.messages.len(), 3);

    session.close().await;
}

#[tokio::test]
async fn older_pages_load_until_history_is_exhausted() {
    let api = Arc::new(InMemoryApi::new(participant("u1")).with_page_size(2));
    api.insert_history(
        (0..5).map(|index| message("a", &format!("h{index}"), "u2", at(9, 0, index))),
    );

    let mut session = open(&api, "a");
    let snapshot = wait_until(&mut session, |snapshot| snapshot.loaded).await;
    assert_eq!(ids(&snapshot), vec!["h3", "h4"]);
    assert!(snapshot.has_more);

    session.load_older().unwrap();
    let snapshot = wait_until(&mut session, |snapshot| snapshot.messages.len() == 4).await;
    assert_eq!(ids(&snapshot), vec!["h1", "h2", "h3", "h4"]);
    assert_eq!(snapshot.scroll_requests, 1);

    session.load_older().unwrap();
    let snapshot = wait_until(&mut session, |snapshot| !snapshot.has_more).await;
    assert_eq!(snapshot.messages.len(), 5);

    session.close().await;
}

#[tokio::test]
async fn refetch_after_paging_back_keeps_older_history() {
    let api = Arc::new(InMemoryApi::new(participant("u1")).with_page_size(2));
    api.insert_history(
        (0..4).map(|index| message("a", &format!("h{index}"), "u2", at(9, 0, index))),
    );

    let mut session = open(&api, "a");
    wait_until(&mut session, |snapshot| snapshot.loaded).await;
    session.load_older().unwrap();
    let snapshot = wait_until(&mut session, |snapshot| !snapshot.has_more).await;
    assert_eq!(ids(&snapshot), vec!["h0", "h1", "h2", "h3"]);

    api.insert_history([message("a", "h4", "u2", at(9, 0, 4))]);
    session.refetch().unwrap();
    let snapshot = wait_until(&mut session, |snapshot| has_id(snapshot, "h4")).await;
    assert_eq!(ids(&snapshot), vec!["h0", "h1", "h2", "h3", "h4"]);
    assert!(!snapshot.has_more);

    session.close().await;
}

#[tokio::test]
async fn failed_history_load_is_reported_and_refetch_recovers() {
    let api = Arc::new(InMemoryApi::new(participant("u1")));
    api.insert_history([message("a", "1", "u2", at(10, 0, 0))]);
    api.fail_next_fetch(ApiError::Transport {
        stage: "test",
        details: "timeout".to_string(),
    });

    let mut session = open(&api, "a");
    let snapshot = wait_until(&mut session, |snapshot| snapshot.last_error.is_some()).await;
    assert!(!snapshot.loaded);

    session.refetch().unwrap();
    let snapshot = wait_until(&mut session, |snapshot| snapshot.loaded).await;
    assert_eq!(ids(&snapshot), vec!["1"]);
    assert!(snapshot.last_error.is_none());

    session.close().await;
}
