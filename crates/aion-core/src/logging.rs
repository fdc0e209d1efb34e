//! Structured logging setup shared by every OrMind activity and the
//! service binary. Each long-lived activity logs through `tracing`;
//! this module only owns process-wide subscriber initialization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    Registry,
};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub module_levels: HashMap<String, String>,
    pub format: LogFormat,
    pub with_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: HashMap::new(),
            format: LogFormat::Pretty,
            with_spans: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// Initialize the global `tracing` subscriber. Must be called exactly once,
/// before any activity is spawned.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let mut filter = EnvFilter::from_default_env();
    filter = filter.add_directive(
        config
            .level
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );
    for (module, level) in &config.module_levels {
        let directive = format!("{module}={level}");
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_current_span(config.with_spans)
                .with_span_list(config.with_spans);
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer().pretty().with_span_events(if config.with_spans {
                FmtSpan::NEW | FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            });
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer().compact();
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
        }
    }

    Ok(())
}

/// Correlation id threaded through a Goal's lifetime so every log line and
/// audit record touching it can be grepped together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn correlation_id_roundtrip() {
        let id = CorrelationId::from_string("goal-123".to_string());
        assert_eq!(id.as_str(), "goal-123");
        assert_eq!(format!("{id}"), "goal-123");
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
