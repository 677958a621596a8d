//! PositionProtector (C5)
//!
//! For every position a bot owns, maintains exactly one correctly-positioned
//! stop-loss (and, unless trailing-stop owns the exit, one take-profit).
//! Per-symbol locks are the central defense against the scheduler, the
//! trailing-stop reactor and the force-sync control surface racing to create
//! duplicate protection (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use tracing::{debug, info, warn};

use crate::domain::{
    is_correctly_positioned, BotConfig, Market, OpenOrder, OpenPosition, OrderSide, OrderStatus, ProtectionKind,
};
use crate::error::Result;
use crate::infrastructure::exchange_client::{Candle, ExchangeClient, PlaceOrderRequest, TimeInForce};
use crate::infrastructure::order_id_allocator::OrderIdAllocator;
use crate::infrastructure::order_ops::protection::{
    failsafe_stop_price, full_take_profit_price, more_protective_stop, widen_if_too_close,
};
use crate::infrastructure::order_ops::rounding::{format_price, format_quantity};

const ATR_PERIODS: usize = 14;
/// Threshold under which an existing reduce-only exit order is considered to
/// already cover the intended take-profit size (spec §4.4 "deduplication").
const TP_COVERAGE_THRESHOLD: f64 = 0.95;

type ExistenceKey = (String, ProtectionKind);

/// Single source of truth for stop-loss / take-profit maintenance across all
/// bots sharing the process (spec §4.4).
pub struct PositionProtector {
    exchange: Arc<dyn ExchangeClient>,
    allocator: Arc<OrderIdAllocator>,
    check_cache_ttl: Duration,
    stop_loss_in_progress: DashSet<String>,
    take_profit_in_progress: DashSet<String>,
    existence_cache: DashMap<ExistenceKey, (Instant, bool)>,
}

impl PositionProtector {
    pub fn new(exchange: Arc<dyn ExchangeClient>, allocator: Arc<OrderIdAllocator>, check_cache_ttl: Duration) -> Self {
        Self {
            exchange,
            allocator,
            check_cache_ttl,
            stop_loss_in_progress: DashSet::new(),
            take_profit_in_progress: DashSet::new(),
            existence_cache: DashMap::new(),
        }
    }

    /// `ensureProtection(position, config)` - idempotent, safe to call
    /// repeatedly (spec §4.4 contract).
    pub async fn ensure_protection(&self, bot: &BotConfig, market: &Market, position: &OpenPosition) -> Result<()> {
        if position.is_flat() {
            return Ok(());
        }
        let Some(closing_side) = position.closing_side() else {
            return Ok(());
        };

        if !self.owns_position(bot, &position.symbol).await? {
            debug!("[PositionProtector] {} not owned by bot {}, skipping", position.symbol, bot.bot_id);
            return Ok(());
        }

        self.ensure_stop_loss(bot, market, position, closing_side).await?;
        if !bot.enable_trailing_stop {
            self.ensure_take_profit(bot, market, position, closing_side).await?;
        }
        Ok(())
    }

    /// `cancelProtection(symbol, config)` - used on force-close (spec §4.4).
    pub async fn cancel_protection(&self, bot: &BotConfig, position: &OpenPosition) -> Result<()> {
        let orders = self
            .exchange
            .get_open_orders(Some(&position.symbol), &bot.api_key, &bot.api_secret)
            .await?;
        for order in orders.iter().filter(|o| o.belongs_to(bot) && o.reduce_only && o.status.is_live()) {
            self.cancel_order(bot, order).await?;
        }
        self.existence_cache.remove(&(position.symbol.clone(), ProtectionKind::StopLoss));
        self.existence_cache.remove(&(position.symbol.clone(), ProtectionKind::TakeProfit));
        Ok(())
    }

    async fn ensure_stop_loss(&self, bot: &BotConfig, market: &Market, position: &OpenPosition, closing_side: OrderSide) -> Result<()> {
        if !self.stop_loss_in_progress.insert(position.symbol.clone()) {
            debug!("[PositionProtector] {} stop-loss already being handled, skipping", position.symbol);
            return Ok(());
        }
        let result = self.ensure_stop_loss_inner(bot, market, position, closing_side).await;
        self.stop_loss_in_progress.remove(&position.symbol);
        result
    }

    async fn ensure_stop_loss_inner(
        &self,
        bot: &BotConfig,
        market: &Market,
        position: &OpenPosition,
        closing_side: OrderSide,
    ) -> Result<()> {
        if self.cache_says_exists(&position.symbol, ProtectionKind::StopLoss) {
            return Ok(());
        }

        let orders = self
            .exchange
            .get_open_orders(Some(&position.symbol), &bot.api_key, &bot.api_secret)
            .await?;
        if orders.iter().any(|o| is_stop_loss_shaped(o, position)) {
            self.existence_cache
                .insert((position.symbol.clone(), ProtectionKind::StopLoss), (Instant::now(), true));
            return Ok(());
        }

        let failsafe = failsafe_stop_price(position.avg_entry_price, closing_side, bot.max_negative_pnl_stop_pct, position.leverage);
        let trigger = if bot.enable_hybrid_stop_strategy {
            match self.tactical_stop_price(bot, position, closing_side).await {
                Some(tactical) => more_protective_stop(closing_side, failsafe, tactical),
                None => failsafe,
            }
        } else {
            failsafe
        };
        let trigger = widen_if_too_close(trigger, position.mark_price, closing_side);
        let trigger = format_price(trigger, market);

        let client_id = self.allocator.next_stop_id(bot.bot_id, bot.bot_client_order_id_prefix);
        let body = PlaceOrderRequest {
            symbol: position.symbol.clone(),
            side: closing_side,
            order_type: crate::domain::OrderType::Market,
            quantity: format_quantity(position.net_quantity.abs(), market),
            price: None,
            time_in_force: TimeInForce::GoodTilCancel,
            self_trade_prevention: PlaceOrderRequest::self_trade_prevention_default(),
            client_id,
            post_only: false,
            reduce_only: true,
            stop_loss_trigger_by: Some(PlaceOrderRequest::trigger_by_default()),
            stop_loss_trigger_price: Some(trigger),
            stop_loss_limit_price: None,
            take_profit_trigger_by: None,
            take_profit_trigger_price: None,
            take_profit_limit_price: None,
        };

        match self.exchange.place_order(body, &bot.api_key, &bot.api_secret).await {
            Ok(_) => {
                info!("[PositionProtector] {} stop-loss created", position.symbol);
                self.existence_cache
                    .insert((position.symbol.clone(), ProtectionKind::StopLoss), (Instant::now(), true));
                Ok(())
            }
            Err(err) => {
                warn!("[PositionProtector] {} stop-loss placement failed: {}", position.symbol, err);
                Ok(())
            }
        }
    }

    async fn ensure_take_profit(&self, bot: &BotConfig, market: &Market, position: &OpenPosition, closing_side: OrderSide) -> Result<()> {
        if !self.take_profit_in_progress.insert(position.symbol.clone()) {
            debug!("[PositionProtector] {} take-profit already being handled, skipping", position.symbol);
            return Ok(());
        }
        let result = self.ensure_take_profit_inner(bot, market, position, closing_side).await;
        self.take_profit_in_progress.remove(&position.symbol);
        result
    }

    async fn ensure_take_profit_inner(
        &self,
        bot: &BotConfig,
        market: &Market,
        position: &OpenPosition,
        closing_side: OrderSide,
    ) -> Result<()> {
        if self.cache_says_exists(&position.symbol, ProtectionKind::TakeProfit) {
            return Ok(());
        }

        let orders = self
            .exchange
            .get_open_orders(Some(&position.symbol), &bot.api_key, &bot.api_secret)
            .await?;

        let (target_price, quantity) = if bot.enable_hybrid_stop_strategy {
            let atr = self.tactical_atr(bot, &position.symbol).await.unwrap_or(0.0);
            let offset = atr * bot.partial_take_profit_atr_multiplier;
            let price = match closing_side {
                OrderSide::Ask => position.avg_entry_price + offset,
                OrderSide::Bid => position.avg_entry_price - offset,
            };
            let qty = position.net_quantity.abs() * bot.partial_take_profit_percentage / 100.0;
            (price, qty)
        } else {
            let price = full_take_profit_price(position.avg_entry_price, closing_side, bot.min_profit_percentage, position.leverage);
            (price, position.net_quantity.abs())
        };

        let existing_coverage: f64 = orders
            .iter()
            .filter(|o| is_take_profit_shaped(o, position) && o.side == closing_side)
            .map(|o| o.quantity)
            .sum();
        if existing_coverage >= quantity * TP_COVERAGE_THRESHOLD {
            self.existence_cache
                .insert((position.symbol.clone(), ProtectionKind::TakeProfit), (Instant::now(), true));
            return Ok(());
        }

        let client_id = self.allocator.next_take_profit_id(bot.bot_id, bot.bot_client_order_id_prefix, 0);
        let body = PlaceOrderRequest {
            symbol: position.symbol.clone(),
            side: closing_side,
            order_type: crate::domain::OrderType::Limit,
            quantity: format_quantity(quantity, market),
            price: Some(format_price(target_price, market)),
            time_in_force: TimeInForce::GoodTilCancel,
            self_trade_prevention: PlaceOrderRequest::self_trade_prevention_default(),
            client_id,
            post_only: bot.enable_post_only,
            reduce_only: true,
            stop_loss_trigger_by: None,
            stop_loss_trigger_price: None,
            stop_loss_limit_price: None,
            take_profit_trigger_by: Some(PlaceOrderRequest::trigger_by_default()),
            take_profit_trigger_price: Some(format_price(target_price, market)),
            take_profit_limit_price: None,
        };

        match self.exchange.place_order(body, &bot.api_key, &bot.api_secret).await {
            Ok(_) => {
                info!("[PositionProtector] {} take-profit created", position.symbol);
                self.existence_cache
                    .insert((position.symbol.clone(), ProtectionKind::TakeProfit), (Instant::now(), true));
                Ok(())
            }
            Err(err) => {
                warn!("[PositionProtector] {} take-profit placement failed: {}", position.symbol, err);
                Ok(())
            }
        }
    }

    fn cache_says_exists(&self, symbol: &str, kind: ProtectionKind) -> bool {
        self.existence_cache
            .get(&(symbol.to_string(), kind))
            .map(|entry| entry.0.elapsed() < self.check_cache_ttl && entry.1)
            .unwrap_or(false)
    }

    async fn tactical_stop_price(&self, bot: &BotConfig, position: &OpenPosition, closing_side: OrderSide) -> Option<f64> {
        let atr = self.tactical_atr(bot, &position.symbol).await?;
        let offset = atr * bot.initial_stop_atr_multiplier;
        Some(match closing_side {
            OrderSide::Ask => position.mark_price - offset,
            OrderSide::Bid => position.mark_price + offset,
        })
    }

    async fn tactical_atr(&self, bot: &BotConfig, symbol: &str) -> Option<f64> {
        let candles = self
            .exchange
            .get_klines(symbol, &bot.time, ATR_PERIODS + 1)
            .await
            .ok()?;
        average_true_range(&candles)
    }

    /// A position is acted upon only if a past fill exists on that symbol
    /// carrying the bot's clientId prefix (spec §3 OpenPosition invariant,
    /// §4.4 "Ownership gate").
    async fn owns_position(&self, bot: &BotConfig, symbol: &str) -> Result<bool> {
        let fills = self.exchange.get_fill_history(symbol, &bot.api_key, &bot.api_secret).await?;
        Ok(fills.iter().any(|f| f.client_id.starts_with_prefix(bot.bot_client_order_id_prefix)))
    }

    async fn cancel_order(&self, bot: &BotConfig, order: &OpenOrder) -> Result<()> {
        self.exchange
            .cancel_order(&order.symbol, &order.id, Some(order.client_id), &bot.api_key, &bot.api_secret)
            .await?;
        Ok(())
    }
}

/// Classifies `order` as a stop-loss for `position` (spec §4.4 "Existence
/// check").
fn is_stop_loss_shaped(order: &OpenOrder, position: &OpenPosition) -> bool {
    classify(order, position, ProtectionKind::StopLoss)
}

fn is_take_profit_shaped(order: &OpenOrder, position: &OpenPosition) -> bool {
    classify(order, position, ProtectionKind::TakeProfit)
}

fn classify(order: &OpenOrder, position: &OpenPosition, kind: ProtectionKind) -> bool {
    if !order.reduce_only || !order.status.is_live() {
        return false;
    }
    let has_trigger = match kind {
        ProtectionKind::StopLoss => order.has_stop_loss_trigger(),
        ProtectionKind::TakeProfit => order.has_take_profit_trigger(),
    };
    if has_trigger {
        return true;
    }
    let trigger_price = match kind {
        ProtectionKind::StopLoss => order.stop_loss_trigger_price,
        ProtectionKind::TakeProfit => order.take_profit_trigger_price,
    }
    .or(order.limit_price);
    if let Some(price) = trigger_price {
        if is_correctly_positioned(kind, position, price) {
            return true;
        }
    }
    let is_conditional = order.status == OrderStatus::TriggerPending;
    let correct_side = position.closing_side() == Some(order.side);
    is_conditional && correct_side
}

fn average_true_range(candles: &[Candle]) -> Option<f64> {
    if candles.len() < 2 {
        return None;
    }
    let mut ranges: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for window in candles.windows(2) {
        let (prev, curr) = (&window[0], &window[1]);
        let tr = (curr.high - curr.low)
            .max((curr.high - prev.close).abs())
            .max((curr.low - prev.close).abs());
        ranges.push(tr);
    }
    let sum: f64 = ranges.iter().sum();
    Some(sum / ranges.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketType, OrderBookState};
    use crate::testing::mock_exchange::MockExchangeClient;
    use crate::testing::sample_bot_config;
    use std::sync::atomic::Ordering;

    fn market() -> Market {
        Market {
            symbol: "BTC_USDC_PERP".to_string(),
            tick_size: 0.01,
            step_size: 0.001,
            decimal_price: 2,
            decimal_quantity: 3,
            min_quantity: 0.001,
            maker_fee: 0.0002,
            market_type: MarketType::Perp,
            order_book_state: OrderBookState::Open,
        }
    }

    fn long_position() -> OpenPosition {
        OpenPosition {
            symbol: "BTC_USDC_PERP".to_string(),
            net_quantity: 0.5,
            avg_entry_price: 100.0,
            mark_price: 100.2,
            leverage: 10.0,
        }
    }

    fn protector(exchange: Arc<MockExchangeClient>) -> PositionProtector {
        PositionProtector::new(exchange, Arc::new(OrderIdAllocator::new()), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn creates_stop_loss_when_owned_and_missing() {
        let mock = Arc::new(MockExchangeClient::new());
        mock.push_fill(crate::infrastructure::exchange_client::Fill {
            symbol: "BTC_USDC_PERP".to_string(),
            client_id: crate::domain::ClientOrderId::new(4217_000001),
            price: 100.0,
            quantity: 0.5,
            created_at: chrono::Utc::now(),
        });
        let protector = protector(mock.clone());
        let bot = sample_bot_config();
        let market = market();
        let position = long_position();

        protector.ensure_protection(&bot, &market, &position).await.unwrap();

        assert_eq!(mock.place_order_calls.load(Ordering::SeqCst), 2); // SL + TP
        let orders = mock.open_orders_snapshot();
        assert!(orders.iter().any(|o| o.stop_loss_trigger_price.is_some()));
    }

    #[tokio::test]
    async fn skips_unowned_position() {
        let mock = Arc::new(MockExchangeClient::new());
        let protector = protector(mock.clone());
        let bot = sample_bot_config();
        let market = market();
        let position = long_position();

        protector.ensure_protection(&bot, &market, &position).await.unwrap();

        assert_eq!(mock.place_order_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_ensure_calls_create_exactly_one_stop_loss() {
        let mock = Arc::new(MockExchangeClient::new());
        mock.push_fill(crate::infrastructure::exchange_client::Fill {
            symbol: "BTC_USDC_PERP".to_string(),
            client_id: crate::domain::ClientOrderId::new(4217_000001),
            price: 100.0,
            quantity: 0.5,
            created_at: chrono::Utc::now(),
        });
        let protector = Arc::new(protector(mock.clone()));
        let bot = Arc::new(sample_bot_config());
        let market = Arc::new(market());
        let position = Arc::new(long_position());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let protector = protector.clone();
            let bot = bot.clone();
            let market = market.clone();
            let position = position.clone();
            handles.push(tokio::spawn(async move {
                protector.ensure_protection(&bot, &market, &position).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let orders = mock.open_orders_snapshot();
        let stop_losses = orders.iter().filter(|o| o.stop_loss_trigger_price.is_some()).count();
        assert_eq!(stop_losses, 1);
    }

    #[test]
    fn atr_is_average_true_range_over_candles() {
        let now = chrono::Utc::now();
        let candles = vec![
            Candle { open_time: now, open: 100.0, high: 101.0, low: 99.0, close: 100.0, volume: 1.0 },
            Candle { open_time: now, open: 100.0, high: 102.0, low: 100.0, close: 101.0, volume: 1.0 },
            Candle { open_time: now, open: 101.0, high: 103.0, low: 100.5, close: 102.0, volume: 1.0 },
        ];
        let atr = average_true_range(&candles).unwrap();
        assert!(atr > 0.0);
    }
}
