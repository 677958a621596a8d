//! Process-wide engine configuration
//!
//! Mirrors the reference codebase's `BotConfig::load`/`validate` pattern
//! (YAML file + `.env`-sourced secrets), but for the process-wide knobs
//! (cache TTLs, rate-limit interval, default timeouts) rather than per-bot
//! settings - those live in `crate::domain::BotConfig` and are supplied
//! already-validated by the out-of-scope persistence layer.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Process-wide engine configuration (spec §4.1, §4.3, §4.6 default knobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `AccountCache` TTL - a snapshot younger than this is considered fresh
    /// (spec §4.1, default 55s).
    pub round_cache_duration_secs: u64,
    /// Maximum staleness an `AccountCache` entry may have and still be
    /// returned as a fallback on refresh failure (spec §4.1, default 300s).
    pub extended_cache_limit_secs: u64,
    /// Global minimum inter-call interval enforced against the process-wide
    /// `lastApiCall` timestamp (spec §4.1, default 2s).
    pub min_call_interval_secs: u64,
    /// Window within which the existence-check cache in `PositionProtector`
    /// is considered valid (spec §4.4, default 30s).
    pub protection_check_cache_secs: u64,
    /// Default `orderExecutionTimeoutSeconds` when a bot does not override it
    /// (spec §4.3, default 12s).
    pub default_order_execution_timeout_secs: u64,
    /// Default per-bot scheduling period for `REALTIME` bots (spec §4.6,
    /// default 60s).
    pub default_realtime_period_secs: u64,
    /// Settlement delay before `POST_FILL` invokes `PositionProtector`
    /// (spec §4.3, default 2s).
    pub post_fill_settle_delay_secs: u64,
    /// Maximum number of symbols a single bot tick builds datasets for
    /// (spec §4.6 step 6, default 12).
    pub max_tokens_per_bot: usize,
    /// Window within which a log of a given (botKey, error kind) is
    /// deduplicated to at most one emission (spec §4.1, default 30s).
    pub log_dedup_window_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_cache_duration_secs: 55,
            extended_cache_limit_secs: 300,
            min_call_interval_secs: 2,
            protection_check_cache_secs: 30,
            default_order_execution_timeout_secs: 12,
            default_realtime_period_secs: 60,
            post_fill_settle_delay_secs: 2,
            max_tokens_per_bot: 12,
            log_dedup_window_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let config: EngineConfig = serde_yaml::from_str(&yaml_content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.round_cache_duration_secs == 0 {
            return Err(ConfigError::ValidationError(
                "round_cache_duration_secs must be > 0".to_string(),
            ));
        }
        if self.extended_cache_limit_secs < self.round_cache_duration_secs {
            return Err(ConfigError::ValidationError(
                "extended_cache_limit_secs must be >= round_cache_duration_secs".to_string(),
            ));
        }
        if self.min_call_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "min_call_interval_secs must be > 0".to_string(),
            ));
        }
        if self.max_tokens_per_bot == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens_per_bot must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn round_cache_duration(&self) -> Duration {
        Duration::from_secs(self.round_cache_duration_secs)
    }

    pub fn extended_cache_limit(&self) -> Duration {
        Duration::from_secs(self.extended_cache_limit_secs)
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_secs(self.min_call_interval_secs)
    }

    pub fn protection_check_cache(&self) -> Duration {
        Duration::from_secs(self.protection_check_cache_secs)
    }

    pub fn post_fill_settle_delay(&self) -> Duration {
        Duration::from_secs(self.post_fill_settle_delay_secs)
    }

    pub fn default_order_execution_timeout(&self) -> Duration {
        Duration::from_secs(self.default_order_execution_timeout_secs)
    }

    pub fn log_dedup_window(&self) -> Duration {
        Duration::from_secs(self.log_dedup_window_secs)
    }
}
