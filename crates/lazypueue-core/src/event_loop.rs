use crate::adapter::{AdapterRequest, DaemonEvent};
use crate::app::AppState;
use crate::errors::{LoopError, RenderError};
use crossterm::event::Event;
use futures_util::{Stream, StreamExt};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How long teardown waits for room in a full request queue.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Where frames go. The binary draws to the terminal; tests record.
pub trait RenderSink {
    fn render(&mut self, app: &AppState) -> Result<(), RenderError>;

    /// Rows available to the task list as of the last render, when known.
    fn list_height(&self) -> Option<usize> {
        None
    }
}

/// Drive the dashboard until the user quits or the daemon side gives up.
///
/// One `select!` multiplexes terminal input, daemon events and the tick, so
/// every mutation of `app` happens here, in arrival order. The adapter is
/// asked to shut down on every exit path.
pub async fn run_event_loop<I, R>(
    app: &mut AppState,
    mut input: I,
    sink: &mut R,
    mut daemon: mpsc::Receiver<DaemonEvent>,
    tick: Duration,
) -> Result<(), LoopError>
where
    I: Stream<Item = io::Result<Event>> + Unpin,
    R: RenderSink + ?Sized,
{
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut dirty = true;
    let mut daemon_open = true;

    let result = loop {
        if dirty {
            if let Err(err) = sink.render(app) {
                break Err(LoopError::Render(err.0));
            }
            if let Some(height) = sink.list_height() {
                app.set_viewport(height);
            }
            dirty = false;
        }
        if app.should_quit() {
            break app.take_fatal().map_or(Ok(()), Err);
        }

        tokio::select! {
            _ = ticker.tick() => {
                app.on_tick(Instant::now());
                dirty = true;
            }
            event = daemon.recv(), if daemon_open => match event {
                Some(event) => dirty |= app.handle_daemon(event),
                None => {
                    warn!(event = "daemon_events_closed");
                    daemon_open = false;
                    app.request_quit();
                }
            },
            event = input.next() => match event {
                Some(Ok(event)) => dirty |= app.handle_event(event),
                Some(Err(err)) => break Err(LoopError::Input(err)),
                None => {
                    info!(event = "input_closed");
                    app.request_quit();
                }
            },
        }
    };

    shutdown_adapter(app).await;
    result
}

async fn shutdown_adapter(app: &AppState) {
    let outbound = app.dispatcher().outbound();
    let sent = tokio::time::timeout(SHUTDOWN_GRACE, outbound.send(AdapterRequest::Shutdown)).await;
    match sent {
        Ok(Ok(())) => debug!(event = "adapter_shutdown_requested"),
        Ok(Err(_)) => debug!(event = "adapter_shutdown_skipped", reason = "channel_closed"),
        Err(_) => warn!(event = "adapter_shutdown_skipped", reason = "queue_full"),
    }
}
