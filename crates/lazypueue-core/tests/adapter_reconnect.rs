use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use futures_util::stream;
use lazypueue_core::{
    run_event_loop, spawn_adapter_with, AdapterRequest, AppState, BackoffPolicy, ClientConfig,
    Command, CommandDispatcher, ConnectionError, Connector, DaemonError, DaemonEvent,
    DaemonTransport, DaemonUri, DispatchError, LoopError, RenderError, RenderSink, TaskSelection,
    TaskStatus,
};
use pueue_lib::message::request::Request;
use pueue_lib::message::response::{Response, TaskLogResponse};
use pueue_lib::state::{Group, GroupStatus, State};
use pueue_lib::task::{Task, TaskStatus as PueueStatus};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn at(second: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2026, 3, 1, 9, 0, second)
        .single()
        .expect("unambiguous local time")
}

fn pueue_task(id: usize, status: PueueStatus) -> Task {
    let mut task = Task::new(
        format!("job {id}"),
        PathBuf::from("/srv/app"),
        HashMap::new(),
        "default".to_string(),
        status,
        Vec::new(),
        0,
        None,
    );
    task.id = id;
    task
}

fn queued() -> PueueStatus {
    PueueStatus::Queued { enqueued_at: at(0) }
}

fn running() -> PueueStatus {
    PueueStatus::Running {
        enqueued_at: at(0),
        start: at(1),
    }
}

fn state(tasks: Vec<Task>) -> State {
    let mut state = State::new();
    state.groups = BTreeMap::from([(
        "default".to_string(),
        Group {
            status: GroupStatus::Running,
            parallel_tasks: 1,
        },
    )]);
    state.tasks = tasks.into_iter().map(|task| (task.id, task)).collect();
    state
}

fn compressed(text: &str) -> Vec<u8> {
    let mut encoder = snap::write::FrameEncoder::new(Vec::new());
    encoder.write_all(text.as_bytes()).expect("compress");
    encoder.into_inner().expect("flush")
}

/// How one scripted session behaves after answering the initial state fetch.
#[derive(Clone)]
enum Session {
    /// Answer every call.
    Serve(State),
    /// Fail the next call as if pueued went away.
    DropAfterState(State),
    /// Never answer again.
    HangAfterState(State),
}

impl Session {
    fn state(&self) -> &State {
        match self {
            Session::Serve(state)
            | Session::DropAfterState(state)
            | Session::HangAfterState(state) => state,
        }
    }
}

/// A pueued stand-in. Every connect takes the next entry; once they run out
/// the socket refuses.
#[derive(Default)]
struct Script {
    sessions: Mutex<VecDeque<Result<Session, ConnectionError>>>,
    connects: Mutex<usize>,
    commands: Mutex<usize>,
}

impl Script {
    fn new(sessions: Vec<Result<Session, ConnectionError>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            ..Self::default()
        })
    }

    fn connects(&self) -> usize {
        *self.connects.lock().expect("script")
    }

    fn commands(&self) -> usize {
        *self.commands.lock().expect("script")
    }
}

struct ScriptedConnector(Arc<Script>);

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&self) -> Result<ScriptedTransport, ConnectionError> {
        *self.0.connects.lock().expect("script") += 1;
        let next = self.0.sessions.lock().expect("script").pop_front();
        match next {
            Some(Ok(session)) => Ok(ScriptedTransport {
                session,
                calls: 0,
                script: Arc::clone(&self.0),
            }),
            Some(Err(error)) => Err(error),
            None => Err(refused()),
        }
    }
}

struct ScriptedTransport {
    session: Session,
    calls: usize,
    script: Arc<Script>,
}

#[async_trait]
impl DaemonTransport for ScriptedTransport {
    async fn call(&mut self, request: Request) -> Result<Response, DaemonError> {
        self.calls += 1;
        if self.calls > 1 {
            match self.session {
                Session::DropAfterState(_) => return Err(DaemonError::Disconnected),
                Session::HangAfterState(_) => return std::future::pending().await,
                Session::Serve(_) => {}
            }
        }
        let response = match request {
            Request::Status => Response::Status(Box::new(self.session.state().clone())),
            Request::Log(_) => {
                let task = pueue_task(7, running());
                let log = TaskLogResponse {
                    task,
                    output_complete: true,
                    output: Some(compressed("done\n")),
                };
                Response::Log(BTreeMap::from([(7, log)]))
            }
            _ => {
                *self.script.commands.lock().expect("script") += 1;
                Response::Success("ok".to_string())
            }
        };
        Ok(response)
    }
}

fn refused() -> ConnectionError {
    ConnectionError::Refused(PathBuf::from("/tmp/pueue.socket"))
}

fn config() -> ClientConfig {
    let mut config = ClientConfig::new(DaemonUri::from_path("/tmp/pueue.socket"));
    config.tick = Duration::from_millis(10);
    config.call_timeout = Duration::from_millis(200);
    config.backoff = BackoffPolicy {
        initial: Duration::from_millis(20),
        max: Duration::from_secs(5),
    };
    config
}

async fn next_event(events: &mut mpsc::Receiver<DaemonEvent>) -> DaemonEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("daemon event in time")
        .expect("adapter still running")
}

async fn expect_startup(events: &mut mpsc::Receiver<DaemonEvent>) {
    assert!(matches!(next_event(events).await, DaemonEvent::Connected));
    match next_event(events).await {
        DaemonEvent::Snapshot { resync, .. } => assert!(resync),
        other => panic!("expected initial snapshot, got {other:?}"),
    }
}

async fn shut_down(
    requests: mpsc::Sender<AdapterRequest>,
    mut events: mpsc::Receiver<DaemonEvent>,
    adapter: tokio::task::JoinHandle<()>,
) {
    requests.send(AdapterRequest::Shutdown).await.expect("shutdown");
    assert!(matches!(next_event(&mut events).await, DaemonEvent::Stopped));
    tokio::time::timeout(WAIT, adapter)
        .await
        .expect("adapter exits")
        .expect("adapter task");
}

#[tokio::test]
async fn lost_daemon_is_retried_with_growing_backoff_then_resynced() {
    let script = Script::new(vec![
        Ok(Session::DropAfterState(state(vec![pueue_task(1, queued())]))),
        Err(refused()),
        Err(ConnectionError::Timeout(Duration::from_millis(200))),
        Ok(Session::Serve(state(vec![
            pueue_task(1, running()),
            pueue_task(2, queued()),
        ]))),
    ]);
    let (requests, mut events, adapter) =
        spawn_adapter_with(ScriptedConnector(Arc::clone(&script)), config());
    expect_startup(&mut events).await;

    // The daemon only answers requests, so the loss shows on the next poll.
    requests.send(AdapterRequest::Refresh).await.expect("refresh");
    match next_event(&mut events).await {
        DaemonEvent::Disconnected { error } => assert_eq!(error, DaemonError::Disconnected),
        other => panic!("expected disconnect, got {other:?}"),
    }

    let mut attempts = Vec::new();
    let mut delays = Vec::new();
    loop {
        match next_event(&mut events).await {
            DaemonEvent::Reconnecting { attempt, delay } => {
                attempts.push(attempt);
                delays.push(delay);
            }
            DaemonEvent::Reconnected => break,
            other => panic!("unexpected event while reconnecting: {other:?}"),
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(delays.windows(2).all(|pair| pair[0] < pair[1]), "{delays:?}");
    assert!(delays.iter().all(|delay| *delay <= Duration::from_secs(5)));

    match next_event(&mut events).await {
        DaemonEvent::Snapshot { snapshot, resync } => {
            assert!(resync, "reconnect must resync from a full fetch");
            assert_eq!(snapshot.len(), 2);
            assert_eq!(
                snapshot.task(1).map(|task| &task.status),
                Some(&TaskStatus::Running)
            );
        }
        other => panic!("expected resync snapshot, got {other:?}"),
    }

    shut_down(requests, events, adapter).await;
    assert_eq!(script.connects(), 4);
    assert_eq!(script.commands(), 0);
}

#[tokio::test]
async fn duplicate_pause_reaches_the_daemon_once() {
    let script = Script::new(vec![Ok(Session::Serve(state(vec![pueue_task(7, running())])))]);
    let (requests, mut events, adapter) =
        spawn_adapter_with(ScriptedConnector(Arc::clone(&script)), config());
    expect_startup(&mut events).await;

    let mut dispatcher = CommandDispatcher::new(requests.clone(), 1);
    let pause = Command::Pause(TaskSelection::Tasks(vec![7]));
    let handle = dispatcher.submit(pause.clone()).expect("first submit");
    assert!(matches!(
        dispatcher.submit(pause),
        Err(DispatchError::AlreadyPending(_))
    ));

    match next_event(&mut events).await {
        DaemonEvent::CommandResult {
            handle: resolved,
            result,
        } => {
            assert_eq!(resolved, handle);
            assert_eq!(result.map(|outcome| outcome.message), Ok("ok".to_string()));
        }
        other => panic!("expected command result, got {other:?}"),
    }

    requests
        .send(AdapterRequest::FetchLog {
            task_id: 7,
            lines: Some(200),
        })
        .await
        .expect("log request");
    match next_event(&mut events).await {
        DaemonEvent::Log { task_id, result } => {
            assert_eq!(task_id, 7);
            assert_eq!(result.map(|chunk| chunk.output), Ok("done\n".to_string()));
        }
        other => panic!("expected log output, got {other:?}"),
    }

    shut_down(requests, events, adapter).await;
    assert_eq!(script.commands(), 1);
}

#[tokio::test]
async fn unanswered_call_times_out_and_reconnects() {
    let script = Script::new(vec![
        Ok(Session::HangAfterState(state(vec![pueue_task(3, queued())]))),
        Ok(Session::Serve(state(vec![pueue_task(3, queued())]))),
    ]);
    let (requests, mut events, adapter) =
        spawn_adapter_with(ScriptedConnector(Arc::clone(&script)), config());
    expect_startup(&mut events).await;

    let mut dispatcher = CommandDispatcher::new(requests.clone(), 0);
    let handle = dispatcher
        .submit(Command::Stash { task_ids: vec![3] })
        .expect("submit");

    match next_event(&mut events).await {
        DaemonEvent::CommandResult {
            handle: resolved,
            result,
        } => {
            assert_eq!(resolved, handle);
            assert_eq!(result, Err(DaemonError::Timeout));
        }
        other => panic!("expected timed out command, got {other:?}"),
    }
    // A late answer would desync the stream, so the session is replaced.
    assert!(matches!(
        next_event(&mut events).await,
        DaemonEvent::Disconnected {
            error: DaemonError::Timeout
        }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        DaemonEvent::Reconnecting { attempt: 1, .. }
    ));
    assert!(matches!(next_event(&mut events).await, DaemonEvent::Reconnected));
    assert!(matches!(
        next_event(&mut events).await,
        DaemonEvent::Snapshot { resync: true, .. }
    ));

    shut_down(requests, events, adapter).await;
    assert_eq!(script.connects(), 2);
}

struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _app: &AppState) -> Result<(), RenderError> {
        Ok(())
    }
}

#[tokio::test]
async fn reconnect_ceiling_ends_the_event_loop() {
    let script = Script::new(vec![
        Ok(Session::DropAfterState(state(vec![pueue_task(1, queued())]))),
        Err(refused()),
        Err(refused()),
    ]);
    let mut config = config();
    config.max_reconnect_attempts = Some(2);
    let (requests, events, adapter) =
        spawn_adapter_with(ScriptedConnector(Arc::clone(&script)), config.clone());
    let mut app = AppState::new(&config, requests);

    // The tick's poll finds the dead session; two refused reconnects follow.
    let result = tokio::time::timeout(
        WAIT,
        run_event_loop(
            &mut app,
            stream::pending::<io::Result<crossterm::event::Event>>(),
            &mut NullSink,
            events,
            config.tick,
        ),
    )
    .await
    .expect("loop finished");

    match result {
        Err(LoopError::ReconnectFailed { attempts, error }) => {
            assert_eq!(attempts, 2);
            assert_eq!(error, refused());
        }
        other => panic!("expected reconnect failure, got {other:?}"),
    }
    assert!(app.should_quit());
    assert_eq!(script.connects(), 3);
    tokio::time::timeout(WAIT, adapter)
        .await
        .expect("adapter exits")
        .expect("adapter task");
}
