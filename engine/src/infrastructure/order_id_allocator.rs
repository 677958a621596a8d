//! OrderIdAllocator (C3)
//!
//! Per-bot monotonically increasing client-order-id generator whose every
//! value carries the bot's unique prefix (spec §4.2).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::warn;

use crate::domain::{BotId, ClientOrderId};

/// Suffix kind appended to a failsafe id (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeKind {
    Stop,
    Target,
}

impl FailsafeKind {
    fn suffix(self) -> i64 {
        match self {
            FailsafeKind::Stop => 1001,
            FailsafeKind::Target => 1002,
        }
    }
}

/// Persists a per-bot counter alongside the bot's prefix. Each call
/// atomically increments the counter and returns `prefix * 10^k + counter`
/// (spec §4.2).
pub struct OrderIdAllocator {
    counters: DashMap<BotId, AtomicI64>,
}

impl OrderIdAllocator {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    fn next_counter(&self, bot_id: BotId) -> i64 {
        let counter = self
            .counters
            .entry(bot_id)
            .or_insert_with(|| AtomicI64::new(1));
        counter.fetch_add(1, Ordering::SeqCst)
    }

    /// `nextId(botId)` - the base client-order-id for a new entry order.
    pub fn next_id(&self, bot_id: BotId, prefix: i64) -> ClientOrderId {
        let counter = self.next_counter(bot_id);
        ClientOrderId::new(compose(prefix, counter, 6))
    }

    /// `nextStopId(botId) = nextId . 1000 + 999` (spec §4.2).
    pub fn next_stop_id(&self, bot_id: BotId, prefix: i64) -> ClientOrderId {
        let base = self.next_id(bot_id, prefix).0;
        ClientOrderId::new(base * 1000 + 999)
    }

    /// `nextTakeProfitId(botId, i) = nextId . 10 + (i+1)` (spec §4.2).
    pub fn next_take_profit_id(&self, bot_id: BotId, prefix: i64, index: u32) -> ClientOrderId {
        let base = self.next_id(bot_id, prefix).0;
        ClientOrderId::new(base * 10 + i64::from(index) + 1)
    }

    /// `nextFailsafeId(botId, kind) = nextId . 10000 + (1001|1002)` (spec §4.2).
    pub fn next_failsafe_id(&self, bot_id: BotId, prefix: i64, kind: FailsafeKind) -> ClientOrderId {
        let base = self.next_id(bot_id, prefix).0;
        ClientOrderId::new(base * 10000 + kind.suffix())
    }

    /// Emergency fallback used when the normal allocation path is unavailable.
    /// Never fails; logs a warning and still returns a usable id (spec §4.2).
    pub fn emergency_fallback(prefix: i64, suffix: i64) -> ClientOrderId {
        warn!(
            "[OrderIdAllocator] falling back to emergency id generation for prefix {}",
            prefix
        );
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let base = seconds % 1_000_000;
        ClientOrderId::new(compose(prefix, base, 6) * 10 + suffix % 10)
    }
}

impl Default for OrderIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Compose `prefix * 10^digits + counter`, where `digits` is chosen large
/// enough that `counter` never collides with the prefix's own digits
/// (spec §4.2: "`k` is large enough to never collide").
fn compose(prefix: i64, counter: i64, digits: u32) -> i64 {
    prefix * 10i64.pow(digits) + counter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonically_increasing_per_bot() {
        let allocator = OrderIdAllocator::new();
        let a = allocator.next_id(BotId(1), 4217).0;
        let b = allocator.next_id(BotId(1), 4217).0;
        assert!(b > a);
    }

    #[test]
    fn counters_are_independent_per_bot() {
        let allocator = OrderIdAllocator::new();
        let a = allocator.next_id(BotId(1), 4217).0;
        let b = allocator.next_id(BotId(2), 9981).0;
        assert_ne!(a, b);
    }

    #[test]
    fn every_issued_id_starts_with_the_bot_prefix() {
        let allocator = OrderIdAllocator::new();
        for _ in 0..5 {
            let id = allocator.next_id(BotId(1), 4217);
            assert!(id.starts_with_prefix(4217));
        }
    }

    #[test]
    fn stop_and_take_profit_ids_follow_the_spec_formulas() {
        let allocator = OrderIdAllocator::new();
        let stop = allocator.next_stop_id(BotId(1), 4217);
        assert_eq!(stop.0 % 1000, 999);

        let tp0 = allocator.next_take_profit_id(BotId(1), 4217, 0);
        assert_eq!(tp0.0 % 10, 1);
        let tp1 = allocator.next_take_profit_id(BotId(1), 4217, 1);
        assert_eq!(tp1.0 % 10, 2);
    }

    #[test]
    fn failsafe_ids_carry_the_right_suffix() {
        let allocator = OrderIdAllocator::new();
        let stop = allocator.next_failsafe_id(BotId(1), 4217, FailsafeKind::Stop);
        assert_eq!(stop.0 % 10000, 1001);
        let target = allocator.next_failsafe_id(BotId(1), 4217, FailsafeKind::Target);
        assert_eq!(target.0 % 10000, 1002);
    }

    #[test]
    fn emergency_fallback_never_fails_and_keeps_prefix() {
        let id = OrderIdAllocator::emergency_fallback(4217, 1001);
        assert!(id.starts_with_prefix(4217));
    }
}
