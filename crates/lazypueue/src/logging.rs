use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "LAZYPUEUE_LOG_LEVEL";
pub const LOG_FILE_ENV: &str = "LAZYPUEUE_LOG_FILE";
pub const LOG_STDERR_ENV: &str = "LAZYPUEUE_LOG_STDERR";

/// Keeps the log file open for the lifetime of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

/// The terminal belongs to the dashboard, so logs never touch stdout. With no
/// file and no stderr override every record is discarded.
struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
    stderr: bool,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

/// `--debug` forces debug, then `LAZYPUEUE_LOG_LEVEL`, then info.
/// `RUST_LOG` still wins over all of them inside [`init_logging`].
pub fn resolve_level(debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(level) if !level.trim().is_empty() => level,
        _ => "info".to_string(),
    }
}

pub fn resolve_log_file(flag: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = flag.filter(|path| !path.as_os_str().is_empty()) {
        return Some(path.to_path_buf());
    }
    match std::env::var(LOG_FILE_ENV) {
        Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

pub fn init_logging(level: &str, log_file: Option<&Path>) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match log_file.map(open_log_file) {
        Some(Ok(guard)) => guard,
        Some(Err(err)) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
        None => LogGuard { file: None },
    };
    let file = guard.file.clone();
    let stderr = env_true(LOG_STDERR_ENV);
    let make_writer = BoxMakeWriter::new(move || LogWriter {
        file: file.clone(),
        stderr,
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(path: &Path) -> io::Result<LogGuard> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
