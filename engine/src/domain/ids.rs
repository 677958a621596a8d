//! Bot and client-order-id newtypes
//!
//! `ClientOrderId` wraps the bare integer the exchange round-trips so the
//! prefix/ownership invariant (spec §3 "ClientOrderId") is checked in one
//! place instead of being re-derived by every caller.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BotId(pub i64);

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientOrderId(pub i64);

impl ClientOrderId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// An order is attributed to `bot` iff its id starts with the bot's
    /// prefix. The caller must additionally check `createdAt >= bot.created_at`
    /// (spec §3 / §4.2) since this alone cannot distinguish a previous
    /// incarnation of the same bot id.
    pub fn starts_with_prefix(&self, prefix: i64) -> bool {
        let id = self.0.to_string();
        let prefix = prefix.to_string();
        id.starts_with(&prefix)
    }
}

impl std::fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match() {
        let id = ClientOrderId::new(4217_999);
        assert!(id.starts_with_prefix(4217));
        assert!(!id.starts_with_prefix(4218));
    }

    #[test]
    fn prefix_collision_is_textual_not_numeric() {
        // "421" is a textual prefix of "4217999" even though 421 does not
        // divide 4217999 arithmetically - this mirrors the spec's
        // string-based clientId.toString().startsWith(prefix) filter.
        let id = ClientOrderId::new(4217_999);
        assert!(id.starts_with_prefix(421));
    }
}
