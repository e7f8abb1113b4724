//! Logging setup
//!
//! All progress and diagnostics go through `tracing`. The CLI installs one
//! subscriber at startup; output goes to stderr so stdout stays free for
//! `--json` listings and watched command output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::{fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LoggerFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LoggerFormat::Text),
            "json" => Ok(LoggerFormat::Json),
            _ => Err(LoggerError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LoggerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoggerFormat::Text => "text",
            LoggerFormat::Json => "json",
        })
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// The `[log]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// `EnvFilter` directive, e.g. `info` or `gorelease=debug,warn`
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LoggerFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LoggerFormat::Text,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Invalid log format: {0} (expected: text|json)")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Logger has already been initialized")]
    AlreadyInitialized,

    #[error("Failed to initialize logger: {0}")]
    InitializationFailed(String),
}

/// Check that `level` parses as a filter directive
pub fn parse_level(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLevel(level.to_string()))
}

/// Install the global subscriber
pub fn init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = parse_level(&cfg.level)?;
    match cfg.format {
        LoggerFormat::Text => {
            let layer = tfmt::layer().with_writer(std::io::stderr).with_target(false);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
        LoggerFormat::Json => {
            let layer = tfmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_current_span(true)
                .with_span_list(true);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

fn init_with<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        let message = e.to_string();
        if message.contains("SetGlobalDefaultError") {
            LoggerError::AlreadyInitialized
        } else {
            LoggerError::InitializationFailed(message)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<LoggerFormat>().unwrap(), LoggerFormat::Json);
        assert_eq!(" text ".parse::<LoggerFormat>().unwrap(), LoggerFormat::Text);
        assert!(matches!("journald".parse::<LoggerFormat>(), Err(LoggerError::InvalidFormat(_))));
    }

    #[test]
    fn test_level_directives() {
        assert!(parse_level("debug").is_ok());
        assert!(parse_level("gorelease=debug,warn").is_ok());
        assert!(matches!(parse_level("gorelease=loud"), Err(LoggerError::InvalidLevel(_))));
    }

    #[test]
    fn test_config_defaults_from_empty_table() {
        let cfg: LoggerConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg, LoggerConfig::default());
    }
}
