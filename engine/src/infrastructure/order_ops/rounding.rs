//! Price/quantity rounding to market tick/step (spec §4.3 `INIT`, §8).

use crate::domain::Market;

/// Round `price` to the nearest multiple of `market.tick_size`, formatted
/// with at most `MAX_PRICE_DECIMALS` decimals (spec §8: "formatPrice(x,
/// tickSize) produces a string whose numeric value is an integer multiple of
/// tickSize and has <= 6 decimals").
pub fn round_price(price: f64, market: &Market) -> f64 {
    if market.tick_size <= 0.0 {
        return price;
    }
    let ticks = (price / market.tick_size).round();
    let rounded = ticks * market.tick_size;
    let decimals = market.clamped_decimal_price();
    truncate_to_decimals(rounded, decimals)
}

/// Round `quantity` to the nearest multiple of `market.step_size`, flooring
/// up to `step_size` if rounding would otherwise yield zero (spec §8:
/// "quantity rounding yielding 0 -> return stepSize").
pub fn round_quantity(quantity: f64, market: &Market) -> f64 {
    if market.step_size <= 0.0 {
        return quantity.max(market.min_quantity);
    }
    let steps = (quantity / market.step_size).round();
    let rounded = steps * market.step_size;
    let rounded = if rounded <= 0.0 { market.step_size } else { rounded };
    rounded.max(market.min_quantity)
}

/// Format a rounded price as a string with `decimal_price` decimals, the
/// shape the exchange expects on the wire (spec §6 order placement body).
pub fn format_price(price: f64, market: &Market) -> String {
    format!("{:.*}", market.clamped_decimal_price() as usize, round_price(price, market))
}

/// Format a rounded quantity as a string with `decimal_quantity` decimals.
pub fn format_quantity(quantity: f64, market: &Market) -> String {
    format!(
        "{:.*}",
        market.decimal_quantity as usize,
        round_quantity(quantity, market)
    )
}

fn truncate_to_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketType, OrderBookState};

    fn market() -> Market {
        Market {
            symbol: "BTC_USDC_PERP".to_string(),
            tick_size: 0.1,
            step_size: 0.001,
            decimal_price: 1,
            decimal_quantity: 3,
            min_quantity: 0.001,
            maker_fee: 0.0002,
            market_type: MarketType::Perp,
            order_book_state: OrderBookState::Open,
        }
    }

    #[test]
    fn rounds_price_to_tick_size() {
        let m = market();
        assert!((round_price(100.04, &m) - 100.0).abs() < 1e-9);
        assert!((round_price(100.06, &m) - 100.1).abs() < 1e-9);
    }

    #[test]
    fn rounds_quantity_to_step_size() {
        let m = market();
        assert!((round_quantity(0.0014, &m) - 0.001).abs() < 1e-9);
        assert!((round_quantity(0.0016, &m) - 0.002).abs() < 1e-9);
    }

    #[test]
    fn zero_quantity_floors_to_step_size() {
        let m = market();
        assert!((round_quantity(0.0001, &m) - m.step_size).abs() < 1e-9);
    }

    #[test]
    fn price_clamps_to_six_decimals() {
        let mut m = market();
        m.decimal_price = 9;
        m.tick_size = 0.000000001;
        let formatted = format_price(1.123456789, &m);
        let decimals = formatted.split('.').nth(1).map(|s| s.len()).unwrap_or(0);
        assert!(decimals <= 6);
    }

    #[test]
    fn formatted_quantity_is_integer_multiple_of_step() {
        let m = market();
        let formatted = format_quantity(0.0037, &m);
        let value: f64 = formatted.parse().unwrap();
        let ratio = value / m.step_size;
        assert!((ratio - ratio.round()).abs() < 1e-6);
    }
}
