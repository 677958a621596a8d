//! Helpers shared across the engine's unit/scenario tests, and (behind the
//! `testing` feature) reused by the binaries as a dependency-free default
//! wiring when no real exchange integration is configured.

pub mod mock_exchange;

use std::collections::HashSet;

use chrono::Utc;

use crate::domain::{BotConfig, BotId, BotStatus, ExecutionMode};

/// A representative `BotConfig` matching the "happy path" scenario in
/// spec §8: `maxNegativePnlStopPct=4, leverage=10, minProfitPercentage=0.5,
/// enableTrailingStop=false`.
pub fn sample_bot_config() -> BotConfig {
    BotConfig {
        bot_id: BotId(1),
        bot_name: "test-bot".to_string(),
        strategy_name: "test-strategy".to_string(),
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
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
        created_at: Utc::now() - chrono::Duration::hours(1),
        status: BotStatus::Running,
    }
}
