//! Strategy capability set and registry (spec §6 "Strategy contract", §9
//! "Dynamic dispatch on strategies").
//!
//! A strategy is a pure-ish capability: `analyze` turns a set of per-symbol
//! datasets into `OrderIntent`s; `revalidate` is the optional hook the entry
//! state machine's `CANCEL_AND_REVALIDATE` step calls to re-derive the same
//! decision deterministically against fresh data. Strategies themselves
//! (the concrete trading logic) are out of scope (spec §1) - this module is
//! the seam, mirroring the reference codebase's `Strategy` trait object plus
//! config-driven strategy selection.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{BotConfig, Market, OrderIntent};
use crate::error::Result;
use crate::infrastructure::exchange_client::Candle;

/// Per-symbol inputs a strategy needs to produce a signal (spec §4.6 step 6
/// "Build per-symbol datasets (candles + indicators + market meta + current
/// mark)").
#[derive(Debug, Clone)]
pub struct SymbolDataset {
    pub symbol: String,
    pub market: Market,
    pub candles: Vec<Candle>,
    pub mark_price: f64,
}

/// Coarse directional read on the macro asset (BTC by convention, but the
/// engine itself hardcodes nothing - spec §4.6 step 5 "optionally analyze
/// BTC trend first... pass as macro input").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroTrend {
    pub direction: TrendDirection,
    /// Relative strength of the trend, conventionally in `[0, 1]`.
    pub strength: f64,
}

/// Optional macro-trend analyzer `BotRunner` calls before building the
/// per-symbol strategy input, when one is wired in by the supervisor
/// (spec §4.6 step 5, SPEC_FULL §4.6 "BTC-trend macro analysis").
#[async_trait]
pub trait MacroAnalyzer: Send + Sync {
    async fn analyze(&self, timeframe: &str) -> Result<MacroTrend>;
}

/// A strategy: a named, pure async function from datasets to intents, plus
/// an optional deterministic revalidation hook (spec §6, §9).
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// `analyze(dataset, config, btcTrend) -> [OrderIntent]` (spec §6).
    async fn analyze(
        &self,
        datasets: &[SymbolDataset],
        bot: &BotConfig,
        macro_trend: Option<&MacroTrend>,
    ) -> Result<Vec<OrderIntent>>;

    /// `revalidate(intent, fresh_dataset, config) -> bool` (spec §6),
    /// returning the (possibly adjusted) intent rather than a bare bool so a
    /// strategy may also revise price/quantity against fresh data. The
    /// default treats the original signal as still valid - a strategy that
    /// implements no explicit revalidation logic does not silently sabotage
    /// every cancel-and-revalidate cycle.
    async fn revalidate(&self, intent: &OrderIntent, _fresh: &SymbolDataset, _bot: &BotConfig) -> Result<Option<OrderIntent>> {
        Ok(Some(intent.clone()))
    }
}

/// Maps `strategyName` (spec §3 `BotConfig::strategy_name`) to a constructor,
/// mirroring the reference codebase's config-driven strategy selection
/// (spec §9 "A strategy registry maps names -> constructors").
#[derive(Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Strategy>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

/// A strategy that never opens anything. Registered by the binaries under
/// `"noop"` as a safe default for bots whose real strategy hasn't been wired
/// in yet - the rest of the engine (account caching, protection, orphan
/// reaping) still runs, it just never generates new entries.
pub struct NoopStrategy;

#[async_trait]
impl Strategy for NoopStrategy {
    fn name(&self) -> &str {
        "noop"
    }

    async fn analyze(&self, _datasets: &[SymbolDataset], _bot: &BotConfig, _macro_trend: Option<&MacroTrend>) -> Result<Vec<OrderIntent>> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;

    struct AlwaysLongStrategy;

    #[async_trait]
    impl Strategy for AlwaysLongStrategy {
        fn name(&self) -> &str {
            "always_long"
        }

        async fn analyze(&self, datasets: &[SymbolDataset], _bot: &BotConfig, _macro_trend: Option<&MacroTrend>) -> Result<Vec<OrderIntent>> {
            Ok(datasets
                .iter()
                .map(|d| OrderIntent {
                    symbol: d.symbol.clone(),
                    side: OrderSide::Bid,
                    entry_price: d.mark_price,
                    stop_price: d.mark_price * 0.99,
                    target_price: None,
                    quantity: 1.0,
                    original_signal_data: serde_json::json!({}),
                    expected_pnl: 1.0,
                })
                .collect())
        }
    }

    #[test]
    fn registry_round_trips_a_registered_strategy() {
        let mut registry = StrategyRegistry::new();
        registry.register("always_long", || Box::new(AlwaysLongStrategy));

        assert!(registry.contains("always_long"));
        let strategy = registry.create("always_long").unwrap();
        assert_eq!(strategy.name(), "always_long");
        assert!(registry.create("missing").is_none());
    }

    #[tokio::test]
    async fn default_revalidate_treats_signal_as_still_valid() {
        let strategy = AlwaysLongStrategy;
        let intent = OrderIntent {
            symbol: "BTC_USDC_PERP".to_string(),
            side: OrderSide::Bid,
            entry_price: 100.0,
            stop_price: 99.0,
            target_price: None,
            quantity: 1.0,
            original_signal_data: serde_json::json!({}),
            expected_pnl: 1.0,
        };
        let dataset = SymbolDataset {
            symbol: "BTC_USDC_PERP".to_string(),
            market: crate::domain::Market {
                symbol: "BTC_USDC_PERP".to_string(),
                tick_size: 0.01,
                step_size: 0.001,
                decimal_price: 2,
                decimal_quantity: 3,
                min_quantity: 0.001,
                maker_fee: 0.0002,
                market_type: crate::domain::MarketType::Perp,
                order_book_state: crate::domain::OrderBookState::Open,
            },
            candles: vec![],
            mark_price: 100.1,
        };
        let bot = crate::testing::sample_bot_config();

        let result = strategy.revalidate(&intent, &dataset, &bot).await.unwrap();
        assert!(result.is_some());
    }
}
