//! Strategy output: the order a bot wants to place

use super::order::OrderSide;

/// Input to the entry state machine (spec §3 "OrderIntent"). `original_signal_data`
/// is opaque to the engine; it is threaded back into `Strategy::revalidate` at
/// the cancel-and-revalidate step so the same decision can be re-derived
/// deterministically (spec §9).
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    pub quantity: f64,
    pub original_signal_data: serde_json::Value,
    /// Expected PnL used to sort intents descending before sequential
    /// submission (spec §4.6 step 7).
    pub expected_pnl: f64,
}
