//! Shared stop-loss / take-profit price formulas (spec §4.3, §4.4).
//!
//! Both the entry state machine (attaching a stop-loss to the entry order)
//! and `PositionProtector` (maintaining the ongoing exit orders) derive
//! prices from the same failsafe/tactical math, so it lives here once rather
//! than being re-derived by each caller.

use crate::domain::OrderSide;

/// The always-present failsafe stop-loss: `entry * (1 -+ slPct/leverage)`,
/// below entry for a LONG (side = Ask, i.e. the closing side), above for a
/// SHORT (spec §4.3: "entry × (1 ± slPct/leverage) where slPct =
/// |maxNegativePnlStopPct|").
///
/// `closing_side` is the side the *protective* order will be on (`Ask`
/// closes a LONG, `Bid` closes a SHORT) - the same convention as
/// `OpenPosition::closing_side`.
pub fn failsafe_stop_price(entry: f64, closing_side: OrderSide, max_negative_pnl_stop_pct: f64, leverage: f64) -> f64 {
    let sl_pct = max_negative_pnl_stop_pct.abs();
    let offset = (sl_pct / leverage) / 100.0;
    match closing_side {
        OrderSide::Ask => entry * (1.0 - offset), // LONG: SL below entry
        OrderSide::Bid => entry * (1.0 + offset), // SHORT: SL above entry
    }
}

/// The full-size take-profit for the non-hybrid path:
/// `entry * (1 +- (minProfitPercentage/leverage)/100)` (spec §4.4
/// "Take-profit creation", else branch).
pub fn full_take_profit_price(entry: f64, closing_side: OrderSide, min_profit_percentage: f64, leverage: f64) -> f64 {
    let offset = (min_profit_percentage / leverage) / 100.0;
    match closing_side {
        OrderSide::Ask => entry * (1.0 + offset), // LONG: TP above entry
        OrderSide::Bid => entry * (1.0 - offset), // SHORT: TP below entry
    }
}

/// Of two candidate stop-loss prices, pick the one closer to `entry` - the
/// "more protective" one (spec §4.3: "use the *more protective* of this
/// value and any strategy-provided stop, closer to entry for LONG, likewise
/// for SHORT").
pub fn more_protective_stop(closing_side: OrderSide, failsafe: f64, strategy: f64) -> f64 {
    match closing_side {
        // LONG's stop sits below entry; "closer to entry" is the larger value.
        OrderSide::Ask => failsafe.max(strategy),
        // SHORT's stop sits above entry; "closer to entry" is the smaller value.
        OrderSide::Bid => failsafe.min(strategy),
    }
}

/// Widen `trigger_price` to at least 0.1% away from `reference_price` on the
/// protective side, leaving it unchanged if it already clears that distance
/// (spec §4.4 rule 3, §8 boundary behavior).
pub fn widen_if_too_close(trigger_price: f64, reference_price: f64, closing_side: OrderSide) -> f64 {
    const MIN_DISTANCE_PCT: f64 = 0.1;
    let min_distance = reference_price * (MIN_DISTANCE_PCT / 100.0);
    match closing_side {
        OrderSide::Ask => {
            if reference_price - trigger_price < min_distance {
                reference_price - min_distance
            } else {
                trigger_price
            }
        }
        OrderSide::Bid => {
            if trigger_price - reference_price < min_distance {
                reference_price + min_distance
            } else {
                trigger_price
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failsafe_stop_matches_scenario_one() {
        // maxNegativePnlStopPct=4, leverage=10, entry=100 -> 99.60 (spec §8 scenario 1).
        let price = failsafe_stop_price(100.0, OrderSide::Ask, 4.0, 10.0);
        assert!((price - 99.6).abs() < 1e-9);
    }

    #[test]
    fn take_profit_matches_scenario_one() {
        // minProfitPercentage=0.5, leverage=10, entry=100 -> 100.05.
        let price = full_take_profit_price(100.0, OrderSide::Ask, 0.5, 10.0);
        assert!((price - 100.05).abs() < 1e-9);
    }

    #[test]
    fn short_formulas_mirror_long() {
        let sl = failsafe_stop_price(100.0, OrderSide::Bid, 4.0, 10.0);
        assert!((sl - 100.4).abs() < 1e-9);
        let tp = full_take_profit_price(100.0, OrderSide::Bid, 0.5, 10.0);
        assert!((tp - 99.95).abs() < 1e-9);
    }

    #[test]
    fn more_protective_picks_tighter_stop_for_long() {
        // LONG: the higher (closer-to-entry) stop wins.
        assert_eq!(more_protective_stop(OrderSide::Ask, 99.0, 99.5), 99.5);
    }

    #[test]
    fn more_protective_picks_tighter_stop_for_short() {
        // SHORT: the lower (closer-to-entry) stop wins.
        assert_eq!(more_protective_stop(OrderSide::Bid, 101.0, 100.5), 100.5);
    }

    #[test]
    fn widen_leaves_distant_trigger_untouched() {
        let widened = widen_if_too_close(95.0, 100.0, OrderSide::Ask);
        assert!((widened - 95.0).abs() < 1e-9);
    }

    #[test]
    fn widen_pushes_too_close_trigger_to_minimum_distance() {
        let widened = widen_if_too_close(99.95, 100.0, OrderSide::Ask);
        assert!((widened - 99.9).abs() < 1e-9);

        let widened = widen_if_too_close(100.05, 100.0, OrderSide::Bid);
        assert!((widened - 100.1).abs() < 1e-9);
    }
}
