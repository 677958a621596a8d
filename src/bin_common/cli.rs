//! Configuration loading for binaries.
//!
//! The engine itself only ever reads already-validated `BotConfig`s (spec
//! §6 "Persisted bot config" - the management surface that writes them is
//! out of scope); these binaries stand in for that surface with a pair of
//! YAML files read from disk.

use std::path::PathBuf;

use anyhow::{Context, Result};
use engine::config::EngineConfig;
use engine::domain::BotConfig;

/// Type of configuration a binary wants to load.
#[derive(Debug, Clone)]
pub enum ConfigType {
    /// Process-wide engine config (`config/engine_config.yaml`).
    Engine,
    /// The list of bots to run (`config/bots_config.yaml`).
    Bots,
    /// Custom path, provided on the command line or via `CONFIG_PATH`.
    Custom(String),
}

impl ConfigType {
    pub fn default_path(&self) -> &str {
        match self {
            ConfigType::Engine => "config/engine_config.yaml",
            ConfigType::Bots => "config/bots_config.yaml",
            ConfigType::Custom(path) => path,
        }
    }

    pub fn env_var_name(&self) -> &str {
        match self {
            ConfigType::Engine => "ENGINE_CONFIG_PATH",
            ConfigType::Bots => "BOTS_CONFIG_PATH",
            ConfigType::Custom(_) => "CONFIG_PATH",
        }
    }
}

/// Resolve the path for `config_type`: the matching env var if set,
/// otherwise its default path.
pub fn load_config_from_env(config_type: ConfigType) -> PathBuf {
    std::env::var(config_type.env_var_name())
        .unwrap_or_else(|_| config_type.default_path().to_string())
        .into()
}

pub fn load_engine_config(path: impl AsRef<std::path::Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    EngineConfig::load(path).with_context(|| format!("loading engine config from {}", path.display()))
}

/// Loads the bot roster: a YAML file containing a top-level `bots:` list of
/// `BotConfig` rows.
pub fn load_bot_configs(path: impl AsRef<std::path::Path>) -> Result<Vec<BotConfig>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading bot config from {}", path.display()))?;
    let wrapper: BotsFile = serde_yaml::from_str(&raw).with_context(|| format!("parsing bot config at {}", path.display()))?;
    Ok(wrapper.bots)
}

#[derive(serde::Deserialize)]
struct BotsFile {
    bots: Vec<BotConfig>,
}

/// Command-line arguments, excluding the program name.
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_type_paths_and_env_vars() {
        assert_eq!(ConfigType::Engine.default_path(), "config/engine_config.yaml");
        assert_eq!(ConfigType::Bots.default_path(), "config/bots_config.yaml");
        assert_eq!(ConfigType::Engine.env_var_name(), "ENGINE_CONFIG_PATH");

        let custom = ConfigType::Custom("custom/path.yaml".to_string());
        assert_eq!(custom.default_path(), "custom/path.yaml");
        assert_eq!(custom.env_var_name(), "CONFIG_PATH");
    }

    #[test]
    fn load_bot_configs_parses_a_roster_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bots.yaml");
        std::fs::write(
            &path,
            r#"
bots:
  - bot_id: 1
    bot_name: scalper-1
    strategy_name: noop
    api_key: key
    api_secret: secret
    bot_client_order_id_prefix: 4217
    capital_percentage: 10.0
    max_open_orders: 3
    max_negative_pnl_stop_pct: 4.0
    min_profit_percentage: 0.5
    max_slippage_pct: 0.2
    order_execution_timeout_seconds: 12
    time: 5m
    execution_mode: Realtime
    authorized_tokens: []
    enable_trailing_stop: false
    enable_hybrid_stop_strategy: false
    enable_post_only: true
    enable_market_fallback: true
    enable_orphan_order_monitor: true
    initial_stop_atr_multiplier: 1.5
    trailing_stop_atr_multiplier: 1.0
    partial_take_profit_atr_multiplier: 1.0
    partial_take_profit_percentage: 50.0
    next_validation_at: "2026-01-01T00:00:00Z"
    created_at: "2026-01-01T00:00:00Z"
    status: Running
"#,
        )
        .unwrap();

        let bots = load_bot_configs(&path).unwrap();
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].bot_name, "scalper-1");
    }
}
