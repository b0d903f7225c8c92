use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use spark::logging;
use spark::replay::{ReplayError, describe, load_script, replay};
use spark::settings::{ClientSettings, SettingsStore};
use spark_auth::storage::AUTH_FILE_NAME;
use spark_auth::{
    AuthError, AuthReadiness, AuthStore, AuthUser, Route, RouteDecision, RouteGuard,
    authorization_header,
};
use spark_chat::{
    ApiError, ChatError, ChatSession, ConversationId, DisplayMessage, InMemoryApi, MergeOutcome,
    Message, MessageId, MessageStream, ParticipantId, ReconcilerConfig, SessionConfig,
    SessionSnapshot, annotate,
};

const SCENARIO_TIMEOUT: Duration = Duration::from_secs(5);
/// 2026-01-01T10:00:00Z, the anchor for every scripted timestamp.
const SCENARIO_EPOCH_SECONDS: i64 = 1_767_261_600;

#[derive(Debug, Clone)]
struct RunnerArgs {
    mode: RunMode,
    settings_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
enum RunMode {
    Scenario(Scenario),
    Replay(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    IdempotentMerge,
    OrderInvariant,
    GroupingBoundary,
    CrossConversation,
    EchoDedup,
    Walkthrough,
    SendFailure,
    CloseSuppression,
    AuthReadiness,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "idempotent_merge" => Some(Self::IdempotentMerge),
            "order_invariant" => Some(Self::OrderInvariant),
            "grouping_boundary" => Some(Self::GroupingBoundary),
            "cross_conversation" => Some(Self::CrossConversation),
            "echo_dedup" => Some(Self::EchoDedup),
            "walkthrough" => Some(Self::Walkthrough),
            "send_failure" => Some(Self::SendFailure),
            "close_suppression" => Some(Self::CloseSuppression),
            "auth_readiness" => Some(Self::AuthReadiness),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::IdempotentMerge => "idempotent_merge",
            Self::OrderInvariant => "order_invariant",
            Self::GroupingBoundary => "grouping_boundary",
            Self::CrossConversation => "cross_conversation",
            Self::EchoDedup => "echo_dedup",
            Self::Walkthrough => "walkthrough",
            Self::SendFailure => "send_failure",
            Self::CloseSuppression => "close_suppression",
            Self::AuthReadiness => "auth_readiness",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("one of --scenario or --replay is required"))]
    MissingMode { stage: &'static str },
    #[snafu(display("--scenario and --replay cannot be combined"))]
    ConflictingModes { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("chat operation failed on `{stage}`: {source}"))]
    Chat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("auth operation failed on `{stage}`: {source}"))]
    Auth {
        stage: &'static str,
        source: AuthError,
    },
    #[snafu(display("replay failed: {source}"))]
    Replay {
        stage: &'static str,
        source: ReplayError,
    },
    #[snafu(display("scenario '{scenario}' timed out on `{stage}`"))]
    ScenarioTimeout {
        stage: &'static str,
        scenario: &'static str,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    let store = match args.settings_path.clone() {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let settings = store.settings();
    logging::init(&settings);
    for line in settings_lines(&settings) {
        println!("{line}");
    }

    match &args.mode {
        RunMode::Scenario(scenario) => {
            println!("scenario={}", scenario.name());
            run_scenario(*scenario, &settings).await
        }
        RunMode::Replay(path) => run_replay(path, &settings),
    }
}

/// Effective client settings, printed ahead of any scenario output.
fn settings_lines(settings: &ClientSettings) -> Vec<String> {
    vec![
        format!("graphql_url={}", settings.graphql_url),
        format!("graphql_ws_url={}", settings.graphql_ws_url),
        format!("group_gap_seconds={}", settings.group_gap_seconds),
        format!("scroll_follow_threshold={}", settings.scroll_follow_threshold),
    ]
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut replay_path = None;
    let mut settings_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--replay" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-replay-value",
                    arg: "--replay",
                })?;
                replay_path = Some(PathBuf::from(value));
            }
            "--settings" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-settings-value",
                    arg: "--settings",
                })?;
                settings_path = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    let mode = match (scenario, replay_path) {
        (Some(scenario), None) => RunMode::Scenario(scenario),
        (None, Some(path)) => RunMode::Replay(path),
        (Some(_), Some(_)) => {
            return ConflictingModesSnafu {
                stage: "parse-args-mode",
            }
            .fail();
        }
        (None, None) => {
            return MissingModeSnafu {
                stage: "parse-args-mode-required",
            }
            .fail();
        }
    };

    Ok(RunnerArgs {
        mode,
        settings_path,
    })
}

async fn run_scenario(scenario: Scenario, settings: &ClientSettings) -> RunnerResult<()> {
    let session_config = settings.to_session_config();
    match scenario {
        Scenario::IdempotentMerge => run_idempotent_merge(),
        Scenario::OrderInvariant => run_order_invariant(),
        Scenario::GroupingBoundary => run_grouping_boundary(),
        Scenario::CrossConversation => run_cross_conversation(),
        Scenario::EchoDedup => run_echo_dedup(),
        Scenario::Walkthrough => run_walkthrough(session_config).await,
        Scenario::SendFailure => run_send_failure(session_config).await,
        Scenario::CloseSuppression => run_close_suppression(session_config).await,
        Scenario::AuthReadiness => run_auth_readiness(),
        Scenario::All => run_all(session_config).await,
    }
}

async fn run_all(session_config: SessionConfig) -> RunnerResult<()> {
    run_idempotent_merge()?;
    run_order_invariant()?;
    run_grouping_boundary()?;
    run_cross_conversation()?;
    run_echo_dedup()?;
    run_walkthrough(session_config).await?;
    run_send_failure(session_config).await?;
    run_close_suppression(session_config).await?;
    run_auth_readiness()?;

    println!("all_passed=true");
    Ok(())
}

fn run_replay(path: &Path, settings: &ClientSettings) -> RunnerResult<()> {
    let script = load_script(path).context(ReplaySnafu {
        stage: "replay-load-script",
    })?;
    println!("replay={}", path.display());
    println!("conversation={}", script.conversation);

    let report = replay(&script, settings.to_session_config().reconciler);
    for (index, step) in report.steps.iter().enumerate() {
        println!(
            "step={index} event={} changed={} entries={}",
            step.event, step.changed, step.len
        );
    }
    for message in &report.display {
        println!("{}", describe(message, script.viewer.as_ref()));
    }
    println!("has_more={}", report.has_more);
    println!("runner_ok=true");
    Ok(())
}

fn run_idempotent_merge() -> RunnerResult<()> {
    let batch = vec![
        message("c1", "h1", "u2", 0, "hey")?,
        message("c1", "h2", "u1", 60, "hi")?,
    ];
    let mut stream = MessageStream::new(conversation("c1")?, ReconcilerConfig::default());
    stream.seed(batch.clone());
    let first = stream.display();

    stream.seed(batch.clone());
    let replayed = batch
        .iter()
        .cloned()
        .map(|message| stream.insert_live(message))
        .filter(|outcome| outcome.changed())
        .count();
    let mut rewritten = batch[0].clone();
    rewritten.text = "rewritten".to_string();
    let rewrite_outcome = stream.insert_live(rewritten);

    let idempotent =
        first == stream.display() && replayed == 0 && rewrite_outcome == MergeOutcome::Duplicate;
    println!("entries={}", stream.len());
    println!("idempotent_merge={idempotent}");
    ensure!(
        idempotent,
        ScenarioFailedSnafu {
            stage: "scenario-idempotent-merge",
            scenario: "idempotent_merge",
            reason: "re-delivered messages changed the display sequence".to_string(),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

fn run_order_invariant() -> RunnerResult<()> {
    let messages = vec![
        message("c1", "a", "u1", 0, "one")?,
        message("c1", "b", "u2", 30, "two")?,
        message("c1", "c", "u1", 400, "three")?,
        message("c1", "d", "u1", 420, "four")?,
    ];
    let orders: [[usize; 4]; 3] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]];

    let mut sequences = Vec::with_capacity(orders.len());
    for order in orders {
        let mut stream = MessageStream::new(conversation("c1")?, ReconcilerConfig::default());
        for index in order {
            stream.insert_live(messages[index].clone());
        }
        sequences.push(ids_of(&stream.display()));
    }

    let order_invariant = sequences.windows(2).all(|pair| pair[0] == pair[1]);
    let expected = vec!["a", "b", "c", "d"];
    let sorted = sequences.first().is_some_and(|sequence| *sequence == expected);
    println!("order_invariant={order_invariant}");
    println!("sorted_by_sent_at={sorted}");
    ensure!(
        order_invariant && sorted,
        ScenarioFailedSnafu {
            stage: "scenario-order-invariant",
            scenario: "order_invariant",
            reason: format!("insertion orders produced {sequences:?}"),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

fn run_grouping_boundary() -> RunnerResult<()> {
    let gap = ReconcilerConfig::default().group_gap;
    let split = annotate(
        vec![
            message("c1", "a", "u1", 0, "first")?,
            message("c1", "b", "u1", 301, "after 5:01")?,
        ],
        gap,
    );
    let grouped = annotate(
        vec![
            message("c1", "a", "u1", 0, "first")?,
            message("c1", "b", "u1", 299, "after 4:59")?,
        ],
        gap,
    );

    let split_ok = split
        .iter()
        .all(|message| message.is_first_in_group && message.is_last_in_group);
    let grouped_ok = grouped[0].is_first_in_group
        && !grouped[0].is_last_in_group
        && !grouped[1].is_first_in_group
        && grouped[1].is_last_in_group;
    println!("split_after_301s={split_ok}");
    println!("grouped_after_299s={grouped_ok}");
    ensure!(
        split_ok && grouped_ok,
        ScenarioFailedSnafu {
            stage: "scenario-grouping-boundary",
            scenario: "grouping_boundary",
            reason: "five minute boundary grouped incorrectly".to_string(),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

fn run_cross_conversation() -> RunnerResult<()> {
    let mut stream = MessageStream::new(conversation("c1")?, ReconcilerConfig::default());
    stream.seed(vec![message("c1", "h1", "u2", 0, "hey")?]);
    let revision = stream.revision();

    let outcome = stream.insert_live(message("c2", "x1", "u3", 30, "elsewhere")?);
    let filtered = outcome == MergeOutcome::ForeignConversation
        && stream.len() == 1
        && stream.revision() == revision;
    println!("foreign_outcome={outcome:?}");
    println!("cross_conversation_filtered={filtered}");
    ensure!(
        filtered,
        ScenarioFailedSnafu {
            stage: "scenario-cross-conversation",
            scenario: "cross_conversation",
            reason: "a message for another conversation reached the working set".to_string(),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

fn run_echo_dedup() -> RunnerResult<()> {
    let mut stream = MessageStream::new(conversation("c1")?, ReconcilerConfig::default());
    let echo = message("c1", "m1", "u1", 0, "hi")?;
    let mut delivered = echo.clone();
    delivered.text = "hi (subscription copy)".to_string();

    let first = stream.insert_echo(echo);
    let second = stream.insert_live(delivered);
    let kept_text = stream
        .display()
        .first()
        .map(|message| message.message.text.clone())
        .unwrap_or_default();

    let deduplicated = first == MergeOutcome::Inserted
        && second == MergeOutcome::Duplicate
        && stream.len() == 1
        && kept_text == "hi";
    println!("entries={}", stream.len());
    println!("echo_dedup={deduplicated}");
    ensure!(
        deduplicated,
        ScenarioFailedSnafu {
            stage: "scenario-echo-dedup",
            scenario: "echo_dedup",
            reason: format!("expected one entry with echo text, got {kept_text:?}"),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

async fn run_walkthrough(session_config: SessionConfig) -> RunnerResult<()> {
    let viewer = participant("u1")?;
    let api = Arc::new(
        InMemoryApi::new(viewer.clone()).with_fixed_clock(at(60), TimeDelta::minutes(1)),
    );
    api.insert_history([message("c1", "h1", "u2", 0, "hey")?]);

    let mut session = ChatSession::open(api.clone(), conversation("c1")?, viewer, session_config);
    wait_for_snapshot(&mut session, "walkthrough", |snapshot| snapshot.loaded).await?;
    wait_for_live_subscriber(&api, "walkthrough").await?;

    session.set_draft("hi").context(ChatSnafu {
        stage: "scenario-walkthrough-draft",
    })?;
    let sent = session.send(Vec::new()).await.context(ChatSnafu {
        stage: "scenario-walkthrough-send",
    })?;
    api.publish_live(message("c1", "l1", "u1", 120, "there")?);

    let snapshot = wait_for_snapshot(&mut session, "walkthrough", |snapshot| {
        snapshot.messages.len() == 3
    })
    .await?;
    session.close().await;

    for message in &snapshot.messages {
        println!("{}", describe(message, Some(&snapshot.viewer)));
    }
    let flags: Vec<(bool, bool)> = snapshot
        .messages
        .iter()
        .map(|message| (message.is_first_in_group, message.is_last_in_group))
        .collect();
    let ids = ids_of(&snapshot.messages);
    let walkthrough_ok = ids == vec!["h1", sent.id.as_str(), "l1"]
        && flags == vec![(true, true), (true, false), (false, true)];
    println!("scroll_requests={}", snapshot.scroll_requests);
    println!("walkthrough={walkthrough_ok}");
    ensure!(
        walkthrough_ok,
        ScenarioFailedSnafu {
            stage: "scenario-walkthrough",
            scenario: "walkthrough",
            reason: format!("unexpected display {ids:?} with groups {flags:?}"),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

async fn run_send_failure(session_config: SessionConfig) -> RunnerResult<()> {
    let viewer = participant("u1")?;
    let api = Arc::new(InMemoryApi::new(viewer.clone()));
    api.fail_next_send(ApiError::Transport {
        stage: "scripted-send",
        details: "connection reset".to_string(),
    });

    let mut session = ChatSession::open(api.clone(), conversation("c1")?, viewer, session_config);
    wait_for_snapshot(&mut session, "send_failure", |snapshot| snapshot.loaded).await?;

    session.set_draft("hello").context(ChatSnafu {
        stage: "scenario-send-failure-draft",
    })?;
    let result = session.send(Vec::new()).await;
    let reported = matches!(result, Err(ChatError::SendFailed { .. }));
    let snapshot = wait_for_snapshot(&mut session, "send_failure", |snapshot| {
        !snapshot.sending
    })
    .await?;
    session.close().await;

    let draft_restored = snapshot.draft == "hello";
    let inserted_nothing = snapshot.messages.is_empty();
    println!("send_error_reported={reported}");
    println!("draft_restored={draft_restored}");
    println!("inserted_nothing={inserted_nothing}");
    ensure!(
        reported && draft_restored && inserted_nothing,
        ScenarioFailedSnafu {
            stage: "scenario-send-failure",
            scenario: "send_failure",
            reason: format!("unexpected state after failed send: {snapshot:?}"),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

async fn run_close_suppression(session_config: SessionConfig) -> RunnerResult<()> {
    let viewer = participant("u1")?;
    let api = Arc::new(
        InMemoryApi::new(viewer.clone()).with_fetch_delay(Duration::from_millis(50)),
    );
    api.insert_history([message("c1", "h1", "u2", 0, "hey")?]);

    let session = ChatSession::open(api.clone(), conversation("c1")?, viewer, session_config);
    let watcher = session.watch();
    session.close().await;

    api.publish_live(message("c1", "l1", "u2", 30, "late")?);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot: SessionSnapshot = watcher.borrow().clone();
    let suppressed = snapshot.messages.is_empty() && !snapshot.loaded;
    println!("late_events_suppressed={suppressed}");
    ensure!(
        suppressed,
        ScenarioFailedSnafu {
            stage: "scenario-close-suppression",
            scenario: "close_suppression",
            reason: format!("closed view changed to {snapshot:?}"),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

fn run_auth_readiness() -> RunnerResult<()> {
    let dir = env::temp_dir().join(format!("spark-runner-auth-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let path = dir.join(AUTH_FILE_NAME);
    let chat_route = Route::parse("/chat/c1");

    let store = AuthStore::new(path.clone());
    let waits_while_unknown =
        RouteGuard::decide(&store.readiness(), &chat_route) == RouteDecision::Wait;
    let guest = store.resolve();
    let guest_redirected = guest == AuthReadiness::Unauthenticated
        && RouteGuard::decide(&guest, &chat_route) == RouteDecision::Redirect(Route::SignIn);

    store
        .sign_in(AuthUser::new("u1", "anna"), "tok-1")
        .context(AuthSnafu {
            stage: "scenario-auth-readiness-sign-in",
        })?;
    let restored = AuthStore::new(path).resolve();
    let restored_ok = authorization_header(&restored) == "Bearer tok-1"
        && RouteGuard::decide(&restored, &chat_route) == RouteDecision::Allow;
    let _ = std::fs::remove_dir_all(&dir);

    println!("waits_while_unknown={waits_while_unknown}");
    println!("guest_redirected={guest_redirected}");
    println!("session_restored={restored_ok}");
    ensure!(
        waits_while_unknown && guest_redirected && restored_ok,
        ScenarioFailedSnafu {
            stage: "scenario-auth-readiness",
            scenario: "auth_readiness",
            reason: "route guard acted on unresolved or stale auth state".to_string(),
        }
    );

    println!("runner_ok=true");
    Ok(())
}

async fn wait_for_snapshot(
    session: &mut ChatSession,
    scenario: &'static str,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> RunnerResult<SessionSnapshot> {
    match tokio::time::timeout(SCENARIO_TIMEOUT, session.wait_for(predicate)).await {
        Ok(result) => result.context(ChatSnafu {
            stage: "wait-for-snapshot",
        }),
        Err(_) => ScenarioTimeoutSnafu {
            stage: "wait-for-snapshot",
            scenario,
        }
        .fail(),
    }
}

async fn wait_for_live_subscriber(api: &InMemoryApi, scenario: &'static str) -> RunnerResult<()> {
    let waited = tokio::time::timeout(SCENARIO_TIMEOUT, async {
        while api.live_subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    match waited {
        Ok(()) => Ok(()),
        Err(_) => ScenarioTimeoutSnafu {
            stage: "wait-for-live-subscriber",
            scenario,
        }
        .fail(),
    }
}

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(SCENARIO_EPOCH_SECONDS + seconds)
}

fn conversation(raw: &str) -> RunnerResult<ConversationId> {
    ConversationId::parse(raw).context(ChatSnafu {
        stage: "scenario-conversation-id",
    })
}

fn participant(raw: &str) -> RunnerResult<ParticipantId> {
    ParticipantId::parse(raw).context(ChatSnafu {
        stage: "scenario-participant-id",
    })
}

fn message(
    conversation_id: &str,
    id: &str,
    sender: &str,
    seconds: i64,
    text: &str,
) -> RunnerResult<Message> {
    let id = MessageId::parse(id).context(ChatSnafu {
        stage: "scenario-message-id",
    })?;
    Ok(Message::new(
        id,
        conversation(conversation_id)?,
        participant(sender)?,
        text,
        at(seconds),
    ))
}

fn ids_of(messages: &[DisplayMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|message| message.id().to_string())
        .collect()
}
