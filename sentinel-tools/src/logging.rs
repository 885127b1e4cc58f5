use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ConfigError;

/// Where a tool sends its log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Appended to, created if missing.
    File(PathBuf),
    /// Full-screen tools with no log file configured.
    Off,
}

impl LogTarget {
    /// Full-screen tools must not write to the terminal they draw on.
    pub fn for_screen(file: Option<PathBuf>) -> LogTarget {
        match file {
            Some(path) => LogTarget::File(path),
            None => LogTarget::Off,
        }
    }

    pub fn for_stream(file: Option<PathBuf>) -> LogTarget {
        match file {
            Some(path) => LogTarget::File(path),
            None => LogTarget::Stderr,
        }
    }
}

/// Builds the filter: `RUST_LOG` if set, otherwise `level`.
pub fn env_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| ConfigError::LogFilter {
        filter: level.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber. Call once at startup.
pub fn init_logging(level: &str, target: LogTarget) -> Result<(), ConfigError> {
    let registry = tracing_subscriber::registry();
    match target {
        LogTarget::Off => Ok(()),
        LogTarget::Stderr => registry
            .with(env_filter(level)?)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|_| ConfigError::LoggingInit),
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| ConfigError::LogFile { path, source })?;
            registry
                .with(env_filter(level)?)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
                .map_err(|_| ConfigError::LoggingInit)
        }
    }
}
