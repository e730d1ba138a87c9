use crate::adapter::BackoffPolicy;
use crate::dispatcher::DEFAULT_COMMAND_RETRIES;
use crate::errors::ConnectionError;
use crate::view_model::TransitionPolicy;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const URI_ENV: &str = "LAZYPUEUE_URI";
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STARTUP_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOG_LINES: usize = 200;

/// Location of the daemon's Unix socket, written as `unix:///path` or a bare path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonUri {
    path: PathBuf,
}

impl DaemonUri {
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConnectionError::InvalidUri(raw.to_string()));
        }
        let path = match trimmed.split_once("://") {
            Some(("unix", rest)) if rest.starts_with('/') => rest,
            Some(_) => return Err(ConnectionError::InvalidUri(raw.to_string())),
            None => trimmed,
        };
        Ok(Self::from_path(path))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for DaemonUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unix://{}", self.path.display())
    }
}

/// pueue names its socket after the user and keeps it in the runtime dir.
pub fn default_socket_path(runtime_dir: Option<&Path>, user: Option<&str>) -> PathBuf {
    let user = user
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("default");
    let file_name = format!("pueue_{user}.socket");
    match runtime_dir {
        Some(dir) if dir.is_dir() => dir.join(file_name),
        _ => std::env::temp_dir().join(file_name),
    }
}

pub fn discover_socket_path() -> PathBuf {
    let runtime_dir = non_empty_env("XDG_RUNTIME_DIR").map(PathBuf::from);
    let user = non_empty_env("USER").or_else(|| non_empty_env("USERNAME"));
    default_socket_path(runtime_dir.as_deref(), user.as_deref())
}

/// `--uri` wins, then `LAZYPUEUE_URI`, then the socket named in pueue's own
/// config file, then the discovered default socket.
pub fn resolve_daemon_uri(explicit: Option<&str>) -> Result<DaemonUri, ConnectionError> {
    if let Some(raw) = explicit.filter(|value| !value.trim().is_empty()) {
        return DaemonUri::parse(raw);
    }
    if let Some(raw) = non_empty_env(URI_ENV) {
        return DaemonUri::parse(&raw);
    }
    if let Some(settings) = pueue_settings() {
        return Ok(DaemonUri::from_path(settings.shared.unix_socket_path()));
    }
    Ok(DaemonUri::from_path(discover_socket_path()))
}

/// The shared secret pueued expects, as configured for pueue itself.
pub fn pueue_secret_path() -> Option<PathBuf> {
    pueue_settings().map(|settings| settings.shared.shared_secret_path())
}

/// pueue's settings, only when a config file actually exists.
#[cfg(unix)]
fn pueue_settings() -> Option<pueue_lib::settings::Settings> {
    match pueue_lib::settings::Settings::read(&None) {
        Ok((settings, true)) => Some(settings),
        Ok((_, false)) => None,
        Err(err) => {
            tracing::debug!(event = "pueue_config_unreadable", error = %err);
            None
        }
    }
}

#[cfg(not(unix))]
fn pueue_settings() -> Option<pueue_lib::settings::Settings> {
    None
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub uri: DaemonUri,
    /// File holding pueued's shared secret; `None` sends an empty secret.
    pub secret_path: Option<PathBuf>,
    pub client_id: String,
    pub tick: Duration,
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub startup_attempts: u32,
    pub max_reconnect_attempts: Option<u32>,
    pub command_retries: u32,
    pub transition_policy: TransitionPolicy,
    pub log_lines: usize,
}

impl ClientConfig {
    pub fn new(uri: DaemonUri) -> Self {
        Self {
            uri,
            secret_path: None,
            client_id: format!("lazypueue-{}", uuid::Uuid::new_v4().simple()),
            tick: DEFAULT_TICK,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CALL_TIMEOUT,
            backoff: BackoffPolicy::default(),
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS,
            max_reconnect_attempts: None,
            command_retries: DEFAULT_COMMAND_RETRIES,
            transition_policy: TransitionPolicy::default(),
            log_lines: DEFAULT_LOG_LINES,
        }
    }
}
