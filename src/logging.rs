//! Logging setup for the demo binary
//!
//! Log lines always go to the real stderr or a file, never through the
//! virtualized stdio table, so worker output and diagnostics cannot mix.

use std::env;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming the log file
const LOG_FILE_VAR: &str = "STDIO_PROXY_LOG_FILE";
/// When "true", the process id is spliced into the log file name
const LOG_UNIQUE_VAR: &str = "STDIO_PROXY_LOG_UNIQUE";
/// When "true", log lines are JSON
const LOG_JSON_VAR: &str = "STDIO_PROXY_LOG_JSON";

/// Error types for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("Cannot open log file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Filter directive (e.g. "debug", "stdio_proxy=trace")
    pub level: String,
    /// Log file; stderr when `None`
    pub file_path: Option<PathBuf>,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Read `RUST_LOG` and the `STDIO_PROXY_LOG_*` variables
    pub fn from_env() -> Self {
        let unique = env_flag(LOG_UNIQUE_VAR);
        Self {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            file_path: env::var(LOG_FILE_VAR).ok().map(|path| {
                let path = PathBuf::from(path);
                if unique {
                    with_pid_suffix(&path, std::process::id())
                } else {
                    path
                }
            }),
            json_format: env_flag(LOG_JSON_VAR),
        }
    }

    /// Apply values given on the command line
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|value| value == "true")
}

/// `dir/name.ext` becomes `dir/name.<pid>.ext`
fn with_pid_suffix(path: &Path, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let stem = stem.to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{pid}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{pid}"),
    };
    path.with_file_name(name)
}

fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::File {
            path: path.to_path_buf(),
            source,
        })
}

/// Install the global subscriber described by `config`
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_new(&config.level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| LoggingError::Filter {
            filter: config.level.clone(),
            reason: e.to_string(),
        })?;
    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = |e: tracing_subscriber::util::TryInitError| {
        LoggingError::AlreadyInitialized(e.to_string())
    };

    match (&config.file_path, config.json_format) {
        (Some(path), true) => {
            let file = open_log_file(path)?;
            registry
                .with(fmt::layer().json().with_writer(file).with_ansi(false))
                .try_init()
                .map_err(installed)
        }
        (Some(path), false) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_thread_names(true)
                        .with_thread_ids(true),
                )
                .try_init()
                .map_err(installed)
        }
        (None, true) => registry
            .with(fmt::layer().json().with_writer(io::stderr).with_ansi(false))
            .try_init()
            .map_err(installed),
        (None, false) => registry
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .map_err(installed),
    }
}

/// Log how long an operation took, tagged with the process id
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "Performance timing"
        );
    };
}
