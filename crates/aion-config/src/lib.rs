//! Loads the immutable `PlatformConfig` snapshot every OrMind activity is
//! started with (spec §9: "Global configuration is an immutable snapshot
//! loaded at startup, rebindable only through an explicit reconfiguration
//! operation"). `aion-server` calls [`PlatformConfig::load`] once at
//! process start; nothing downstream mutates it in place — a
//! reconfiguration produces a brand new snapshot that is itself
//! Governor-gated and audited, which this crate does not implement.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub scheduler: SchedulerConfig,
    pub cost: CostConfig,
    pub healing: HealingConfig,
    pub audit: AuditConfig,
    pub governor: GovernorConfig,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    pub backoff_seconds: Vec<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_seconds: vec![10, 20, 40],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub poll_interval_seconds: u64,
    pub migration_threshold: f64,
    pub reliability_weight: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            migration_threshold: 0.15,
            reliability_weight: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    pub window_samples: usize,
    pub z_threshold: f64,
    pub vram_critical_pct: f64,
    pub temp_critical_celsius: f64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            window_samples: 60,
            z_threshold: 3.0,
            vram_critical_pct: 97.0,
            temp_critical_celsius: 84.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub batch_size: usize,
    pub seal_interval_seconds: u64,
    /// Name of the environment variable holding the HMAC chaining
    /// secret, resolved at startup via `aion_core::secrets`.
    pub hmac_secret_env: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            seal_interval_seconds: 5,
            hmac_secret_env: "ORMIND_AUDIT_HMAC_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub daily_cap_usd: f64,
    pub per_action_cap_usd: f64,
}

/// Format/level of the process-wide `tracing` subscriber. Not in the
/// original config key list but required to wire up `aion_core::logging`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl PlatformConfig {
    /// Loads config from, in order: defaults, then an optional TOML file
    /// named by `ORMIND_CONFIG_FILE` or found at `./ormind.toml`, then
    /// environment variable overrides (`ORMIND_GOVERNOR_DAILY_CAP_USD`
    /// etc.), then validates. There is no required-field default for
    /// `governor.daily_cap_usd` / `governor.per_action_cap_usd` — those
    /// caps must be supplied explicitly.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("scheduler.max_retries", 3i64)
            .unwrap()
            .set_default("scheduler.backoff_seconds", vec![10i64, 20, 40])
            .unwrap()
            .set_default("cost.poll_interval_seconds", 60i64)
            .unwrap()
            .set_default("cost.migration_threshold", 0.15)
            .unwrap()
            .set_default("cost.reliability_weight", 2.0)
            .unwrap()
            .set_default("healing.window_samples", 60i64)
            .unwrap()
            .set_default("healing.z_threshold", 3.0)
            .unwrap()
            .set_default("healing.vram_critical_pct", 97.0)
            .unwrap()
            .set_default("healing.temp_critical_celsius", 84.0)
            .unwrap()
            .set_default("audit.batch_size", 128i64)
            .unwrap()
            .set_default("audit.seal_interval_seconds", 5i64)
            .unwrap()
            .set_default("audit.hmac_secret_env", "ORMIND_AUDIT_HMAC_SECRET")
            .unwrap()
            .set_default("logging.level", "info")
            .unwrap()
            .set_default("logging.format", "pretty")
            .unwrap();

        let file_path = std::env::var("ORMIND_CONFIG_FILE")
            .unwrap_or_else(|_| "./ormind.toml".to_string());
        if Path::new(&file_path).exists() {
            builder = builder.add_source(config::File::with_name(&file_path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ORMIND")
                .separator("_")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let config: PlatformConfig = raw
            .try_deserialize()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.governor.daily_cap_usd <= 0.0 {
            return Err(ConfigError::Invalid(
                "governor.daily_cap_usd must be positive".to_string(),
            ));
        }
        if self.governor.per_action_cap_usd <= 0.0 {
            return Err(ConfigError::Invalid(
                "governor.per_action_cap_usd must be positive".to_string(),
            ));
        }
        if self.governor.per_action_cap_usd > self.governor.daily_cap_usd {
            return Err(ConfigError::Invalid(
                "governor.per_action_cap_usd cannot exceed governor.daily_cap_usd".to_string(),
            ));
        }
        if self.scheduler.backoff_seconds.is_empty() {
            return Err(ConfigError::Invalid(
                "scheduler.backoff_seconds must have at least one entry".to_string(),
            ));
        }
        if self.healing.z_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "healing.z_threshold must be positive".to_string(),
            ));
        }
        if self.audit.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "audit.batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
