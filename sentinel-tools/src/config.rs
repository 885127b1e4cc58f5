//! YAML configuration shared by the tools.
//!
//! Every section is optional; missing keys keep their defaults.
//!
//! ```yaml
//! engine:
//!   url: tcp://localhost:5000
//!   connect_timeout_ms: 3000
//!   reconnect_initial_ms: 500
//!   reconnect_max_ms: 10000
//!   give_up_after_s: 120
//! feed:
//!   capacity: 10
//! baseline:
//!   alerts: 75
//!   amount: Rp 1.25 Bn
//! logging:
//!   level: info
//!   file: /tmp/alert-monitor.log
//! ```

use sentinel::feed::connection::{ConnectOptions, ReconnectPolicy};
use sentinel::feed::{port, util};
use sentinel::{Baseline, DashboardOptions};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid engine url `{url}`: {reason}")]
    EngineUrl { url: String, reason: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("invalid log filter `{filter}`: {reason}")]
    LogFilter { filter: String, reason: String },
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("logging already initialised")]
    LoggingInit,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Give up after this many seconds without a connection.
    pub give_up_after_s: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let reconnect = ReconnectPolicy::default();
        EngineConfig {
            url: util::default_engine_url(),
            connect_timeout_ms: 3000,
            reconnect_initial_ms: reconnect.initial_delay.as_millis() as u64,
            reconnect_max_ms: reconnect.max_delay.as_millis() as u64,
            give_up_after_s: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            capacity: sentinel::alerts::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is not set.
    pub level: String,
    /// Log file, where the tool would otherwise log to the terminal.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineConfig,
    pub feed: FeedConfig,
    pub baseline: Baseline,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Config, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        port::check_url(&self.engine.url).map_err(|e| ConfigError::EngineUrl {
            url: self.engine.url.clone(),
            reason: e.to_string(),
        })?;
        if self.engine.connect_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "engine.connect_timeout_ms",
            });
        }
        if self.feed.capacity == 0 {
            return Err(ConfigError::Zero {
                field: "feed.capacity",
            });
        }
        Ok(())
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_millis(self.engine.connect_timeout_ms),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(self.engine.reconnect_initial_ms),
                max_delay: Duration::from_millis(self.engine.reconnect_max_ms),
                give_up_after: self.engine.give_up_after_s.map(Duration::from_secs),
            },
            ..ConnectOptions::default()
        }
    }

    pub fn dashboard_options(&self) -> DashboardOptions {
        DashboardOptions {
            connect: self.connect_options(),
            capacity: self.feed.capacity,
            baseline: self.baseline.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_yaml_str("").unwrap(), Config::default());
        assert_eq!(Config::from_yaml_str("\n  \n").unwrap(), Config::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_yaml_str(
            "engine:\n  url: tcp://engine.local\n  reconnect_max_ms: 2000\n  give_up_after_s: 30\n\
             baseline:\n  alerts: 5\n  amount: USD 3k\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.url, "tcp://engine.local");
        assert_eq!(config.engine.connect_timeout_ms, 3000);
        assert_eq!(config.baseline.alerts, 5);
        assert_eq!(config.baseline.entities, 84);
        assert_eq!(config.baseline.amount, "USD 3k");

        let options = config.dashboard_options();
        assert_eq!(options.capacity, 10);
        assert_eq!(options.connect.reconnect.initial_delay, Duration::from_millis(500));
        assert_eq!(options.connect.reconnect.max_delay, Duration::from_secs(2));
        assert_eq!(
            options.connect.reconnect.give_up_after,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_yaml_str("engine:\n  urll: x\n"),
            Err(ConfigError::Parse(_))
        ));
        let config = Config::from_yaml_str("engine:\n  url: ws://localhost:5000\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::EngineUrl { .. })));
        let config = Config::from_yaml_str("feed:\n  capacity: 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "feed.capacity"
            })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Config::from_file(Path::new("/nonexistent/sentinel.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
