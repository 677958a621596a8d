//! Account snapshot entities

use std::collections::HashMap;

use super::market::Market;

/// Fraction of net equity considered "real" (non-leveraged) capital.
/// spec §3: `realCapital = netEquityAvailable * 0.95`.
pub const REAL_CAPITAL_FACTOR: f64 = 0.95;

/// A single immutable snapshot of the account, produced wholesale by
/// `AccountCache` and never mutated in place (spec §4.1 invariant iii).
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub net_equity_available: f64,
    pub leverage: f64,
    pub maker_fee: f64,
    pub markets: HashMap<String, Market>,
}

impl AccountSnapshot {
    pub fn new(net_equity_available: f64, leverage: f64, maker_fee: f64, markets: HashMap<String, Market>) -> Self {
        Self {
            net_equity_available,
            leverage,
            maker_fee,
            markets,
        }
    }

    /// `realCapital = netEquityAvailable * 0.95` (spec §3).
    pub fn real_capital(&self) -> f64 {
        self.net_equity_available * REAL_CAPITAL_FACTOR
    }

    /// `capitalAvailable = realCapital * leverage` (spec §3).
    pub fn capital_available(&self) -> f64 {
        self.real_capital() * self.leverage
    }

    pub fn market(&self, symbol: &str) -> Option<&Market> {
        self.markets.get(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_real_and_available_capital() {
        let snap = AccountSnapshot::new(10_000.0, 10.0, 0.0002, HashMap::new());
        assert!((snap.real_capital() - 9_500.0).abs() < f64::EPSILON);
        assert!((snap.capital_available() - 95_000.0).abs() < f64::EPSILON);
    }
}
