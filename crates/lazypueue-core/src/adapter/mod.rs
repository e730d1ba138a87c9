//! Daemon client adapter.
//!
//! A single tokio task owns the daemon session. It receives
//! [`AdapterRequest`]s from the event loop and reports everything that
//! happens (snapshots, command outcomes, connection state) as
//! [`DaemonEvent`]s. pueued only answers requests, so live state is polled:
//! the loop asks for a refresh every tick. Reconnection with exponential
//! backoff lives here too, and every successful (re)connect is followed by a
//! full resync.

#[cfg(unix)]
mod connection;
mod transport;

#[cfg(unix)]
pub use connection::{PueueConnection, PueueConnector};
pub use transport::{Connector, DaemonTransport};

use crate::config::ClientConfig;
use crate::dispatcher::{Command, CommandHandle, CommandResult, TaskDraft, COMMAND_QUEUE_CAPACITY};
use crate::errors::{ConnectionError, DaemonError};
use crate::snapshot::Snapshot;
use crate::task::TaskId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based): `initial * 2^(attempt-1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub task_id: TaskId,
    pub output: String,
    /// Bytes of output received so far.
    pub offset: u64,
    /// Only the tail was sent.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub enum AdapterRequest {
    Refresh,
    Execute {
        handle: CommandHandle,
        command: Command,
    },
    FetchLog {
        task_id: TaskId,
        lines: Option<usize>,
    },
    /// Lock a task daemon-side and fetch its editable fields.
    BeginEdit {
        task_id: TaskId,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum DaemonEvent {
    Connected,
    Snapshot {
        snapshot: Snapshot,
        resync: bool,
    },
    Disconnected {
        error: DaemonError,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    Reconnected,
    ReconnectFailed {
        attempts: u32,
        error: ConnectionError,
    },
    StartupFailed {
        attempts: u32,
        error: ConnectionError,
    },
    CommandResult {
        handle: CommandHandle,
        result: Result<CommandResult, DaemonError>,
    },
    RefreshFailed {
        error: DaemonError,
    },
    Log {
        task_id: TaskId,
        result: Result<LogChunk, DaemonError>,
    },
    EditReady {
        task_id: TaskId,
        result: Result<TaskDraft, DaemonError>,
    },
    Stopped,
}

/// Start the adapter against the pueued socket named in `config`.
#[cfg(unix)]
pub fn spawn_adapter(
    config: ClientConfig,
) -> (
    mpsc::Sender<AdapterRequest>,
    mpsc::Receiver<DaemonEvent>,
    JoinHandle<()>,
) {
    let connector = PueueConnector::new(&config);
    spawn_adapter_with(connector, config)
}

#[cfg(not(unix))]
pub fn spawn_adapter(
    _config: ClientConfig,
) -> (
    mpsc::Sender<AdapterRequest>,
    mpsc::Receiver<DaemonEvent>,
    JoinHandle<()>,
) {
    let (request_tx, _request_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let task = tokio::spawn(async move {
        let _ = event_tx
            .send(DaemonEvent::StartupFailed {
                attempts: 0,
                error: ConnectionError::Io("unix domain sockets are unavailable".to_string()),
            })
            .await;
    });
    (request_tx, event_rx, task)
}

pub fn spawn_adapter_with<C: Connector>(
    connector: C,
    config: ClientConfig,
) -> (
    mpsc::Sender<AdapterRequest>,
    mpsc::Receiver<DaemonEvent>,
    JoinHandle<()>,
) {
    let (request_tx, request_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let task = tokio::spawn(run_adapter(connector, config, event_tx, request_rx));
    (request_tx, event_rx, task)
}

pub async fn run_adapter<C: Connector>(
    connector: C,
    config: ClientConfig,
    events: mpsc::Sender<DaemonEvent>,
    mut requests: mpsc::Receiver<AdapterRequest>,
) {
    let mut supervisor = supervisor::Supervisor::new(connector, config, events);
    supervisor.run(&mut requests).await;
}

mod supervisor {
    use super::*;
    use crate::protocol::{
        command_outcome, command_request, draft_from_response, edit_request, log_from_response,
        log_request, snapshot_from_state, state_from_response, status_request,
    };
    use pueue_lib::message::request::Request;
    use pueue_lib::message::response::Response;
    use tracing::{debug, info, warn};

    enum Served {
        Shutdown,
        Lost(DaemonError),
    }

    /// A timed-out call may still be answered later on the same stream, so
    /// timeouts end the session just like a dropped socket.
    fn session_lost<T>(result: &Result<T, DaemonError>) -> Option<DaemonError> {
        match result {
            Err(error) if error.is_transient() => Some(error.clone()),
            _ => None,
        }
    }

    pub(super) struct Supervisor<C: Connector> {
        connector: C,
        config: ClientConfig,
        events: mpsc::Sender<DaemonEvent>,
        seq: u64,
    }

    impl<C: Connector> Supervisor<C> {
        pub(super) fn new(
            connector: C,
            config: ClientConfig,
            events: mpsc::Sender<DaemonEvent>,
        ) -> Self {
            Self {
                connector,
                config,
                events,
                seq: 0,
            }
        }

        pub(super) async fn run(&mut self, requests: &mut mpsc::Receiver<AdapterRequest>) {
            let mut reconnecting = false;
            loop {
                let Some(mut transport) = self.establish(requests, reconnecting).await else {
                    return;
                };
                reconnecting = true;
                match self.serve(&mut transport, requests).await {
                    Served::Shutdown => {
                        info!(event = "daemon_disconnect", reason = "shutdown");
                        drop(transport);
                        self.emit(DaemonEvent::Stopped).await;
                        return;
                    }
                    Served::Lost(error) => {
                        warn!(event = "daemon_connection_lost", error = %error);
                        self.emit(DaemonEvent::Disconnected { error }).await;
                    }
                }
            }
        }

        /// Connect and fetch full state, retrying with backoff. `None` means
        /// stop: shutdown was requested or the attempt budget ran out.
        async fn establish(
            &mut self,
            requests: &mut mpsc::Receiver<AdapterRequest>,
            reconnecting: bool,
        ) -> Option<C::Transport> {
            let mut attempts: u32 = 0;
            loop {
                if reconnecting || attempts > 0 {
                    let retry = if reconnecting { attempts + 1 } else { attempts };
                    let delay = self.config.backoff.delay(retry);
                    self.emit(DaemonEvent::Reconnecting {
                        attempt: retry,
                        delay,
                    })
                    .await;
                    if !self.wait_offline(delay, requests).await {
                        return None;
                    }
                }
                attempts += 1;

                let error = match self.attempt().await {
                    Ok((transport, snapshot)) => {
                        info!(event = "daemon_connected", uri = %self.config.uri, attempts);
                        let event = if reconnecting {
                            DaemonEvent::Reconnected
                        } else {
                            DaemonEvent::Connected
                        };
                        self.emit(event).await;
                        self.emit(DaemonEvent::Snapshot {
                            snapshot,
                            resync: true,
                        })
                        .await;
                        return Some(transport);
                    }
                    Err(error) => error,
                };

                warn!(
                    event = "daemon_connect_failed",
                    uri = %self.config.uri,
                    attempt = attempts,
                    error = %error
                );
                if reconnecting {
                    if let Some(max) = self.config.max_reconnect_attempts {
                        if attempts >= max {
                            self.emit(DaemonEvent::ReconnectFailed { attempts, error }).await;
                            return None;
                        }
                    }
                } else if attempts >= self.config.startup_attempts.max(1) {
                    self.emit(DaemonEvent::StartupFailed { attempts, error }).await;
                    return None;
                }
            }
        }

        async fn attempt(&mut self) -> Result<(C::Transport, Snapshot), ConnectionError> {
            let mut transport = self.connector.connect().await?;
            let state = self
                .call(&mut transport, status_request())
                .await
                .and_then(state_from_response)
                .map_err(|err| ConnectionError::Handshake(format!("state fetch failed: {err}")))?;
            let snapshot = snapshot_from_state(self.next_seq(), &state)
                .map_err(|err| ConnectionError::Handshake(format!("state fetch failed: {err}")))?;
            Ok((transport, snapshot))
        }

        async fn call(
            &self,
            transport: &mut C::Transport,
            request: Request,
        ) -> Result<Response, DaemonError> {
            match tokio::time::timeout(self.config.call_timeout, transport.call(request)).await {
                Ok(result) => result,
                Err(_) => Err(DaemonError::Timeout),
            }
        }

        /// Sleep out a backoff delay while answering requests that cannot be
        /// served. Returns `false` if shutdown was requested.
        async fn wait_offline(
            &mut self,
            delay: Duration,
            requests: &mut mpsc::Receiver<AdapterRequest>,
        ) -> bool {
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => return true,
                    request = requests.recv() => match request {
                        None | Some(AdapterRequest::Shutdown) => {
                            self.emit(DaemonEvent::Stopped).await;
                            return false;
                        }
                        Some(request) => self.reject_offline(request).await,
                    },
                }
            }
        }

        async fn reject_offline(&mut self, request: AdapterRequest) {
            let error = DaemonError::Disconnected;
            match request {
                AdapterRequest::Execute { handle, .. } => {
                    let result = Err(error);
                    self.emit(DaemonEvent::CommandResult { handle, result }).await;
                }
                AdapterRequest::FetchLog { task_id, .. } => {
                    let result = Err(error);
                    self.emit(DaemonEvent::Log { task_id, result }).await;
                }
                AdapterRequest::BeginEdit { task_id } => {
                    let result = Err(error);
                    self.emit(DaemonEvent::EditReady { task_id, result }).await;
                }
                AdapterRequest::Refresh => debug!(event = "refresh_skipped", reason = "offline"),
                AdapterRequest::Shutdown => {}
            }
        }

        async fn serve(
            &mut self,
            transport: &mut C::Transport,
            requests: &mut mpsc::Receiver<AdapterRequest>,
        ) -> Served {
            loop {
                let request = match requests.recv().await {
                    None | Some(AdapterRequest::Shutdown) => return Served::Shutdown,
                    Some(request) => request,
                };
                let lost = match request {
                    AdapterRequest::Refresh => self.refresh(transport).await,
                    AdapterRequest::Execute { handle, command } => {
                        let result = self
                            .call(transport, command_request(&command))
                            .await
                            .and_then(command_outcome);
                        let lost = session_lost(&result);
                        self.emit(DaemonEvent::CommandResult { handle, result }).await;
                        lost
                    }
                    AdapterRequest::FetchLog { task_id, lines } => {
                        let result = self
                            .call(transport, log_request(task_id, lines))
                            .await
                            .and_then(|response| log_from_response(task_id, response));
                        let lost = session_lost(&result);
                        self.emit(DaemonEvent::Log { task_id, result }).await;
                        lost
                    }
                    AdapterRequest::BeginEdit { task_id } => {
                        let result = self
                            .call(transport, edit_request(task_id))
                            .await
                            .and_then(|response| draft_from_response(task_id, response));
                        let lost = session_lost(&result);
                        self.emit(DaemonEvent::EditReady { task_id, result }).await;
                        lost
                    }
                    AdapterRequest::Shutdown => None,
                };
                if let Some(error) = lost {
                    return Served::Lost(error);
                }
            }
        }

        /// Poll full state. Only a lost session is returned; anything else is
        /// reported and the session carries on.
        async fn refresh(&mut self, transport: &mut C::Transport) -> Option<DaemonError> {
            let fetched = self
                .call(transport, status_request())
                .await
                .and_then(state_from_response);
            if let Some(error) = session_lost(&fetched) {
                return Some(error);
            }
            let seq = self.next_seq();
            match fetched.and_then(|state| snapshot_from_state(seq, &state)) {
                Ok(snapshot) => {
                    self.emit(DaemonEvent::Snapshot {
                        snapshot,
                        resync: false,
                    })
                    .await;
                }
                Err(error) => {
                    warn!(event = "snapshot_rejected", error = %error);
                    self.emit(DaemonEvent::RefreshFailed { error }).await;
                }
            }
            None
        }

        fn next_seq(&mut self) -> u64 {
            self.seq = self.seq.saturating_add(1);
            self.seq
        }

        async fn emit(&self, event: DaemonEvent) {
            if self.events.send(event).await.is_err() {
                debug!(event = "daemon_event_dropped", reason = "loop_closed");
            }
        }
    }
}
