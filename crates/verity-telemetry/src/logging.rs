//! Structured logging for verity

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use verity_core::LoggingConfig;

use crate::{TelemetryError, TelemetryResult};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (machine-readable)
    Json,
    /// Pretty format (human-readable, colored)
    #[default]
    Pretty,
    /// Compact format (single line)
    Compact,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(TelemetryError::Config(format!("unknown log format '{}'", other))),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTarget {
    #[default]
    Stdout,
    /// Used by compute children, stdout is reserved for events
    Stderr,
}

fn build_filter(config: &LoggingConfig) -> TelemetryResult<EnvFilter> {
    let directives = config.env_filter.as_deref().unwrap_or(&config.level);
    EnvFilter::try_new(directives).map_err(|e| TelemetryError::Logging(e.to_string()))
}

/// Initialize logging with configuration
pub fn init_logging(config: &LoggingConfig, target: LogTarget) -> TelemetryResult<()> {
    let filter = build_filter(config)?;
    let format: LogFormat = config.format.parse()?;

    macro_rules! install {
        ($layer:expr) => {{
            let layer = $layer.with_timer(UtcTime::rfc_3339()).with_target(true);
            match target {
                LogTarget::Stdout => tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init(),
                LogTarget::Stderr => tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.with_writer(std::io::stderr).with_ansi(false))
                    .try_init(),
            }
            .map_err(|e| TelemetryError::Logging(e.to_string()))
        }};
    }

    match format {
        LogFormat::Json => install!(fmt::layer().json())?,
        LogFormat::Pretty => install!(fmt::layer().pretty())?,
        LogFormat::Compact => install!(fmt::layer().compact())?,
    }

    tracing::debug!(
        "Logging initialized with level: {}, format: {:?}",
        config.level,
        format
    );

    Ok(())
}

/// Log context for one job
#[derive(Debug, Clone)]
pub struct JobLogContext {
    pub job_id: String,
    pub kind: String,
    pub consumer: String,
}

impl JobLogContext {
    pub fn new(job_id: &str, kind: impl ToString, consumer: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: kind.to_string(),
            consumer: consumer.to_string(),
        }
    }

    /// Create a tracing span with this context
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            kind = %self.kind,
            consumer = %self.consumer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(TelemetryError::Config(_))
        ));
    }

    #[test]
    fn test_filter_prefers_env_filter() {
        let config = LoggingConfig {
            level: "not a level !!".to_string(),
            format: "pretty".to_string(),
            env_filter: Some("verity_worker=debug,info".to_string()),
        };
        assert!(build_filter(&config).is_ok());

        let config = LoggingConfig {
            env_filter: Some("verity=loudest".to_string()),
            ..LoggingConfig::default()
        };
        assert!(matches!(build_filter(&config), Err(TelemetryError::Logging(_))));
    }

    #[test]
    fn test_bad_format_rejected_before_install() {
        let config = LoggingConfig {
            format: "yaml".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config, LogTarget::Stdout).is_err());
    }
}
