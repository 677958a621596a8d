//! Open-position entities as reported by the exchange

use super::order::OrderSide;

/// An open position as reported by `ExchangeClient::get_open_positions`
/// (spec §3 "OpenPosition"). `net_quantity` is signed: positive is LONG,
/// negative is SHORT, zero is flat.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub symbol: String,
    pub net_quantity: f64,
    pub avg_entry_price: f64,
    pub mark_price: f64,
    pub leverage: f64,
}

impl OpenPosition {
    pub fn is_flat(&self) -> bool {
        self.net_quantity == 0.0
    }

    pub fn is_long(&self) -> bool {
        self.net_quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.net_quantity < 0.0
    }

    /// The side a reduce-only exit order for this position must be on:
    /// Ask to close a LONG, Bid to close a SHORT (spec §4.4 rule 4).
    pub fn closing_side(&self) -> Option<OrderSide> {
        if self.is_long() {
            Some(OrderSide::Ask)
        } else if self.is_short() {
            Some(OrderSide::Bid)
        } else {
            None
        }
    }
}

/// Distinguishes the two kinds of protection order maintained per position
/// (spec §3 "ProtectionOrder").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionKind {
    StopLoss,
    TakeProfit,
}

/// A stop-loss is *correctly positioned* iff, for a LONG, its trigger price
/// is strictly below entry; for a SHORT, strictly above (spec §3
/// "ProtectionOrder"). A take-profit is the mirror.
pub fn is_correctly_positioned(kind: ProtectionKind, position: &OpenPosition, trigger_price: f64) -> bool {
    let long = position.is_long();
    match kind {
        ProtectionKind::StopLoss => {
            if long {
                trigger_price < position.avg_entry_price
            } else {
                trigger_price > position.avg_entry_price
            }
        }
        ProtectionKind::TakeProfit => {
            if long {
                trigger_price > position.avg_entry_price
            } else {
                trigger_price < position.avg_entry_price
            }
        }
    }
}
