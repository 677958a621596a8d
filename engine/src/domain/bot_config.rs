//! Per-bot configuration
//!
//! `BotConfig` is the persisted row the (out-of-scope) management surface
//! reads and writes; the engine only ever writes `next_validation_at` back
//! (spec §6 "Persisted bot config").

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::BotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Realtime,
    OnCandleClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Running,
    Stopped,
}

/// Full per-bot configuration (spec §3 "BotConfig").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // Identity
    pub bot_id: BotId,
    pub bot_name: String,
    pub strategy_name: String,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    pub bot_client_order_id_prefix: i64,

    // Risk knobs
    pub capital_percentage: f64,
    pub max_open_orders: usize,
    pub max_negative_pnl_stop_pct: f64,
    pub min_profit_percentage: f64,
    pub max_slippage_pct: f64,
    pub order_execution_timeout_seconds: u64,

    // Strategy knobs
    pub time: String,
    pub execution_mode: ExecutionMode,
    pub authorized_tokens: HashSet<String>,
    pub enable_trailing_stop: bool,
    pub enable_hybrid_stop_strategy: bool,
    pub enable_post_only: bool,
    pub enable_market_fallback: bool,
    pub enable_orphan_order_monitor: bool,

    // Hybrid-stop knobs
    pub initial_stop_atr_multiplier: f64,
    pub trailing_stop_atr_multiplier: f64,
    pub partial_take_profit_atr_multiplier: f64,
    pub partial_take_profit_percentage: f64,

    // Scheduling / lifecycle
    pub next_validation_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: BotStatus,
}

impl BotConfig {
    /// Returns true if `authorized_tokens` is empty (meaning "no filter") or
    /// contains `symbol`. Spec §4.1 step 4: markets are filtered by
    /// `authorizedTokens` only "if set".
    pub fn is_authorized(&self, symbol: &str) -> bool {
        self.authorized_tokens.is_empty() || self.authorized_tokens.contains(symbol)
    }

    pub fn botkey(&self) -> BotKey {
        BotKey {
            strategy_name: self.strategy_name.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

/// Key identifying a shared `AccountCache` entry: `(strategy, apiKey)`
/// (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BotKey {
    pub strategy_name: String,
    pub api_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BotConfig {
        BotConfig {
            bot_id: BotId(1),
            bot_name: "scalper-1".to_string(),
            strategy_name: "ema_cross".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            bot_client_order_id_prefix: 4217,
            capital_percentage: 10.0,
            max_open_orders: 3,
            max_negative_pnl_stop_pct: 4.0,
            min_profit_percentage: 0.5,
            max_slippage_pct: 0.2,
            order_execution_timeout_seconds: 12,
            time: "5m".to_string(),
            execution_mode: ExecutionMode::Realtime,
            authorized_tokens: HashSet::new(),
            enable_trailing_stop: false,
            enable_hybrid_stop_strategy: false,
            enable_post_only: true,
            enable_market_fallback: true,
            enable_orphan_order_monitor: true,
            initial_stop_atr_multiplier: 1.5,
            trailing_stop_atr_multiplier: 1.0,
            partial_take_profit_atr_multiplier: 1.0,
            partial_take_profit_percentage: 50.0,
            next_validation_at: Utc::now(),
            created_at: Utc::now(),
            status: BotStatus::Running,
        }
    }

    #[test]
    fn empty_authorized_tokens_means_unrestricted() {
        let bot = sample();
        assert!(bot.is_authorized("ANYTHING_PERP"));
    }

    #[test]
    fn nonempty_authorized_tokens_restricts() {
        let mut bot = sample();
        bot.authorized_tokens.insert("BTC_USDC_PERP".to_string());
        assert!(bot.is_authorized("BTC_USDC_PERP"));
        assert!(!bot.is_authorized("ETH_USDC_PERP"));
    }
}
