use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

fn default_interval() -> u64 {
    60
}

fn default_discovery_interval() -> u64 {
    300
}

fn default_flush_interval() -> u64 {
    120
}

fn default_data_dir() -> String {
    "data".into()
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub market_queries: Vec<String>,

    #[serde(default = "default_interval")]
    pub candle_interval_seconds: u64,

    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_seconds: u64,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub verbose: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path: `EDGEFEED_CONFIG` env var, else `config.yaml`.
    pub fn resolve_path() -> String {
        std::env::var("EDGEFEED_CONFIG").unwrap_or_else(|_| "config.yaml".into())
    }

    fn validate(&self) -> Result<()> {
        if self.market_queries.is_empty() {
            return Err(Error::Config(
                "market_queries must contain at least one entry".into(),
            ));
        }
        if self.candle_interval_seconds == 0 {
            return Err(Error::Config("candle_interval_seconds must be positive".into()));
        }
        if self.discovery_interval_seconds == 0 {
            return Err(Error::Config(
                "discovery_interval_seconds must be positive".into(),
            ));
        }
        if self.flush_interval_seconds == 0 {
            return Err(Error::Config("flush_interval_seconds must be positive".into()));
        }
        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::Config(format!(
                    "log_level must be one of debug/info/warn/error, got '{other}'"
                )))
            }
        }
        Ok(())
    }

    /// Initialize the global tracing subscriber from this config.
    pub fn init_logging(&self) {
        let level = if self.verbose { "debug" } else { self.log_level.as_str() };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_defaults() {
        let f = write_temp("market_queries:\n  - \"election\"\n");
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.candle_interval_seconds, 60);
        assert_eq!(config.discovery_interval_seconds, 300);
        assert_eq!(config.flush_interval_seconds, 120);
        assert_eq!(config.data_dir, "data");
        assert_eq!(config.log_level, "info");
        assert!(!config.verbose);
    }

    #[test]
    fn rejects_empty_market_queries() {
        let f = write_temp("market_queries: []\n");
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_missing_market_queries() {
        let f = write_temp("data_dir: data\n");
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_zero_interval() {
        let f = write_temp("market_queries: [\"a\"]\ncandle_interval_seconds: 0\n");
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_bad_log_level() {
        let f = write_temp("market_queries: [\"a\"]\nlog_level: verbose\n");
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
