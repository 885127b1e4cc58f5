use clap::Parser;
use std::path::PathBuf;

pub mod config;
pub mod logging;
pub mod render;
pub mod sim;

pub use config::{Config, ConfigError};

#[derive(Parser, Debug, Clone, Default)]
pub struct EngineOpts {
    /// Engine address (e.g., tcp://localhost:5000, localhost)
    #[arg(
        short = 'e',
        long = "engine",
        env = "SENTINEL_ENGINE_URL",
        help = "Engine address"
    )]
    pub engine: Option<String>,

    /// YAML configuration file
    #[arg(short = 'c', long = "config", env = "SENTINEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, overriding the configured level (e.g., info, sentinel=debug)
    #[arg(long = "log-level", value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl EngineOpts {
    /// Built-in defaults, overlaid with the config file and then with
    /// whatever was given on the command line or in the environment.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(url) = &self.engine {
            config.engine.url = url.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn command_line_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  url: tcp://10.0.0.1:5000\nfeed:\n  capacity: 4").unwrap();

        let opts = EngineOpts {
            engine: Some("tcp://127.0.0.1:6000".into()),
            config: Some(file.path().to_path_buf()),
            log_level: Some("debug".into()),
        };
        let config = opts.load().unwrap();
        assert_eq!(config.engine.url, "tcp://127.0.0.1:6000");
        assert_eq!(config.feed.capacity, 4);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn flags_parse() {
        let opts =
            EngineOpts::try_parse_from(["alert-tail", "-e", "tcp://engine:5000", "--log-level", "warn"])
                .unwrap();
        assert_eq!(opts.engine.as_deref(), Some("tcp://engine:5000"));
        assert_eq!(opts.log_level.as_deref(), Some("warn"));
    }
}
