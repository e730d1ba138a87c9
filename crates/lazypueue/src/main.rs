mod logging;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use lazypueue_core::{
    pueue_secret_path, resolve_daemon_uri, run_event_loop, spawn_adapter, AdapterRequest,
    AppState, ClientConfig, ConnectionError, LoopError, RenderError, RenderSink,
    TransitionPolicy,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

const EXIT_FAILURE: u8 = 1;
const EXIT_TERMINAL: u8 = 2;
const ADAPTER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "lazypueue", version, about = "Terminal dashboard for the pueue task queue")]
struct Args {
    /// Daemon socket, `unix:///path` or a bare path. Falls back to LAZYPUEUE_URI,
    /// then to pueue's own config.
    #[arg(long)]
    uri: Option<String>,
    /// pueued's shared secret. Defaults to the one named in pueue's config.
    #[arg(long)]
    secret_file: Option<PathBuf>,
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    #[arg(long, default_value_t = 5)]
    startup_attempts: u32,
    /// Unbounded when omitted.
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,
    #[arg(long, default_value_t = 1)]
    command_retries: u32,
    /// Accept status jumps a polled client can miss steps of, such as
    /// queued straight to done.
    #[arg(long, default_value_t = false)]
    lenient_transitions: bool,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn load_config(args: &Args) -> Result<ClientConfig, ConnectionError> {
    let uri = resolve_daemon_uri(args.uri.as_deref())?;
    let mut config = ClientConfig::new(uri);
    config.tick = Duration::from_millis(args.tick_ms.max(1));
    config.call_timeout = Duration::from_millis(args.timeout_ms.max(1));
    config.connect_timeout = config.call_timeout;
    config.startup_attempts = args.startup_attempts.max(1);
    config.max_reconnect_attempts = args.max_reconnect_attempts;
    config.command_retries = args.command_retries;
    config.secret_path = args.secret_file.clone().or_else(pueue_secret_path);
    if args.lenient_transitions {
        config.transition_policy = TransitionPolicy::Reachable;
    }
    Ok(config)
}

type Backend = CrosstermBackend<io::Stdout>;

fn setup_terminal() -> Result<Terminal<Backend>> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<Backend>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

struct TerminalSink {
    terminal: Terminal<Backend>,
    list_height: Option<usize>,
}

impl RenderSink for TerminalSink {
    fn render(&mut self, app: &AppState) -> Result<(), RenderError> {
        let mut height = None;
        self.terminal.draw(|frame| height = Some(ui::render(frame, app)))?;
        self.list_height = height;
        Ok(())
    }

    fn list_height(&self) -> Option<usize> {
        self.list_height
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_file = logging::resolve_log_file(args.log_file.as_deref());
    let level = logging::resolve_level(args.debug);
    let _log_guard = logging::init_logging(&level, log_file.as_deref());

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(event = "config_invalid", error = %err);
            eprintln!("lazypueue: {err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    info!(
        event = "startup",
        uri = %config.uri,
        tick_ms = config.tick.as_millis() as u64,
        client_id = %config.client_id
    );
    run(config).await
}

async fn run(config: ClientConfig) -> ExitCode {
    let (requests, events, adapter) = spawn_adapter(config.clone());

    let terminal = match setup_terminal() {
        Ok(terminal) => terminal,
        Err(err) => {
            let _ = disable_raw_mode();
            let _ = requests.send(AdapterRequest::Shutdown).await;
            error!(event = "terminal_setup_failed", error = %err);
            eprintln!("lazypueue: terminal setup failed: {err:#}");
            return ExitCode::from(EXIT_TERMINAL);
        }
    };
    let mut sink = TerminalSink {
        terminal,
        list_height: None,
    };
    let mut app = AppState::new(&config, requests);

    let input = EventStream::new();
    let result = run_event_loop(&mut app, input, &mut sink, events, config.tick).await;

    if let Err(err) = restore_terminal(&mut sink.terminal) {
        warn!(event = "terminal_restore_failed", error = %err);
    }
    if tokio::time::timeout(ADAPTER_SHUTDOWN_GRACE, adapter)
        .await
        .is_err()
    {
        warn!(event = "adapter_shutdown_timeout");
    }

    match result {
        Ok(()) => {
            info!(event = "exit", code = 0);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(event = "exit", code = EXIT_FAILURE, error = %err);
            eprintln!("lazypueue: {err}");
            if matches!(err, LoopError::StartupFailed { .. }) {
                eprintln!(
                    "lazypueue: is pueued running? \
                     set --uri or LAZYPUEUE_URI to point at its socket"
                );
            }
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
