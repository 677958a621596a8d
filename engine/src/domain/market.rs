//! Market metadata entities

use serde::{Deserialize, Serialize};

/// Maximum number of decimal places a price may carry on this exchange.
/// Any market reporting a higher `decimal_price` is clamped down to this
/// (spec §3 Market invariants, §8 boundary behavior).
pub const MAX_PRICE_DECIMALS: u32 = 6;

/// Exchange-provided per-symbol metadata.
///
/// Invariants: any placed price must be an integer multiple of `tick_size`;
/// any quantity must be a multiple of `step_size` and `>= min_quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub tick_size: f64,
    pub step_size: f64,
    pub decimal_price: u32,
    pub decimal_quantity: u32,
    pub min_quantity: f64,
    pub maker_fee: f64,
    pub market_type: MarketType,
    pub order_book_state: OrderBookState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketType {
    Perp,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBookState {
    Open,
    Closed,
    Settling,
}

impl Market {
    /// Clamp `decimal_price` to `MAX_PRICE_DECIMALS`, per spec §4.1 step 4
    /// and §8 boundary behavior.
    pub fn clamped_decimal_price(&self) -> u32 {
        self.decimal_price.min(MAX_PRICE_DECIMALS)
    }

    pub fn is_tradable_perp(&self) -> bool {
        matches!(self.market_type, MarketType::Perp) && matches!(self.order_book_state, OrderBookState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(decimal_price: u32) -> Market {
        Market {
            symbol: "BTC_USDC_PERP".to_string(),
            tick_size: 0.1,
            step_size: 0.001,
            decimal_price,
            decimal_quantity: 3,
            min_quantity: 0.001,
            maker_fee: 0.0002,
            market_type: MarketType::Perp,
            order_book_state: OrderBookState::Open,
        }
    }

    #[test]
    fn clamps_high_decimal_price() {
        assert_eq!(market(9).clamped_decimal_price(), MAX_PRICE_DECIMALS);
        assert_eq!(market(4).clamped_decimal_price(), 4);
    }

    #[test]
    fn tradable_requires_perp_and_open() {
        assert!(market(6).is_tradable_perp());

        let mut m = market(6);
        m.market_type = MarketType::Spot;
        assert!(!m.is_tradable_perp());

        let mut m = market(6);
        m.order_book_state = OrderBookState::Closed;
        assert!(!m.is_tradable_perp());
    }
}
