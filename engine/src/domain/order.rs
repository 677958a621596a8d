//! Open-order entities as reported by the exchange

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bot_config::BotConfig;
use super::ids::ClientOrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Bid,
    Ask,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Bid => OrderSide::Ask,
            OrderSide::Ask => OrderSide::Bid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    New,
    PartiallyFilled,
    TriggerPending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Statuses that still represent a live order occupying book space
    /// (spec §4.4 "existence check").
    pub fn is_live(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::TriggerPending
        )
    }
}

/// An order as reported by `ExchangeClient::get_open_orders`
/// (spec §3 "OpenOrder").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub client_id: ClientOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub quantity: f64,
    pub reduce_only: bool,
    pub stop_loss_trigger_price: Option<f64>,
    pub take_profit_trigger_price: Option<f64>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl OpenOrder {
    /// An order is attributed to `bot` iff `clientId` begins with the bot's
    /// prefix AND `createdAt >= bot.createdAt` (spec §3 invariant, §4.2).
    pub fn belongs_to(&self, bot: &BotConfig) -> bool {
        self.client_id.starts_with_prefix(bot.bot_client_order_id_prefix) && self.created_at >= bot.created_at
    }

    pub fn has_stop_loss_trigger(&self) -> bool {
        self.stop_loss_trigger_price.is_some()
    }

    pub fn has_take_profit_trigger(&self) -> bool {
        self.take_profit_trigger_price.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bot_config::{BotStatus, ExecutionMode};
    use crate::domain::ids::BotId;
    use std::collections::HashSet;

    fn bot(created_at: DateTime<Utc>, prefix: i64) -> BotConfig {
        BotConfig {
            bot_id: BotId(1),
            bot_name: "b".to_string(),
            strategy_name: "s".to_string(),
            api_key: "k".to_string(),
            api_secret: "sec".to_string(),
            bot_client_order_id_prefix: prefix,
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
            next_validation_at: created_at,
            created_at,
            status: BotStatus::Running,
        }
    }

    fn order(client_id: i64, created_at: DateTime<Utc>) -> OpenOrder {
        OpenOrder {
            id: "ord-1".to_string(),
            client_id: ClientOrderId::new(client_id),
            symbol: "BTC_USDC_PERP".to_string(),
            side: OrderSide::Ask,
            order_type: OrderType::Limit,
            limit_price: Some(100.0),
            quantity: 1.0,
            reduce_only: true,
            stop_loss_trigger_price: Some(99.0),
            take_profit_trigger_price: None,
            status: OrderStatus::New,
            created_at,
        }
    }

    #[test]
    fn attribution_requires_prefix_and_time() {
        let created = Utc::now();
        let b = bot(created, 4217);

        let matching = order(4217_999, created + chrono::Duration::seconds(1));
        assert!(matching.belongs_to(&b));

        let wrong_prefix = order(9999_999, created + chrono::Duration::seconds(1));
        assert!(!wrong_prefix.belongs_to(&b));

        let stale_incarnation = order(4217_999, created - chrono::Duration::seconds(1));
        assert!(!stale_incarnation.belongs_to(&b));
    }

    #[test]
    fn live_statuses() {
        assert!(OrderStatus::New.is_live());
        assert!(OrderStatus::TriggerPending.is_live());
        assert!(!OrderStatus::Filled.is_live());
        assert!(!OrderStatus::Cancelled.is_live());
    }
}
