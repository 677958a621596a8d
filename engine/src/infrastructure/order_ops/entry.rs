//! Hybrid LIMIT-then-MARKET entry state machine (spec §4.3).
//!
//! Modeled as an explicit `EntryState` driven by a loop rather than a
//! recursive descent, matching the reference codebase's order-lifecycle
//! tasks: each state logs its own transition and the loop condition is the
//! only place control leaves the function.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{AccountSnapshot, BotConfig, ClientOrderId, OrderIntent, OrderSide, OrderType};
use crate::error::{EngineError, ExchangeError, Result};
use crate::infrastructure::exchange_client::{ExchangeClient, PlaceOrderRequest, TimeInForce};
use crate::infrastructure::order_id_allocator::OrderIdAllocator;
use crate::infrastructure::order_ops::protection::{failsafe_stop_price, more_protective_stop};
use crate::infrastructure::order_ops::rounding::{format_price, format_quantity};

const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The strategy's revalidation hook, invoked from `CANCEL_AND_REVALIDATE`
/// (spec §4.3, §9 "Dynamic dispatch on strategies"). Returns `None` if the
/// signal no longer matches.
#[async_trait]
pub trait Revalidator: Send + Sync {
    async fn revalidate(&self, intent: &OrderIntent, bot: &BotConfig) -> Result<Option<OrderIntent>>;
}

/// Breaks the `PositionProtector` <-> `OrderOps` cycle (spec §9): `POST_FILL`
/// calls this instead of depending on `PositionProtector` directly.
#[async_trait]
pub trait ProtectionTrigger: Send + Sync {
    async fn ensure_protection(&self, symbol: &str);
}

/// Successful terminal outcome of `open_entry` (spec §4.3 contract).
#[derive(Debug, Clone, PartialEq)]
pub struct FilledEntry {
    pub order_type: OrderType,
    pub exec_price: f64,
    pub slippage_pct: f64,
    pub client_id: ClientOrderId,
}

/// Either the entry filled, or it was deliberately aborted (not an error -
/// the bot simply moves to the next intent). A genuine failure propagates
/// as `Err(EngineError)` instead (spec §4.3 "Failure semantics").
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Filled(FilledEntry),
    /// Carries one of `EngineError::SignalMismatch`, `SlippageExceeded` or
    /// `FallbackDisabled` - the deliberate-abort reasons from spec §4.3.
    Aborted(EngineError),
}

enum EntryState {
    Init,
    PlaceLimit,
    Monitor { client_id: ClientOrderId, started_at: Instant },
    CancelAndRevalidate { client_id: ClientOrderId },
    MarketFallback,
    PostFill { client_id: ClientOrderId, exec_price: f64, slippage_pct: f64 },
}

/// `openEntry(intent, config) -> {success,...} | {aborted, reason} | {error}`
/// (spec §4.3).
#[allow(clippy::too_many_arguments)]
pub async fn open_entry(
    intent: &OrderIntent,
    bot: &BotConfig,
    account: &AccountSnapshot,
    exchange: &Arc<dyn ExchangeClient>,
    allocator: &OrderIdAllocator,
    revalidator: Option<&dyn Revalidator>,
    protection_trigger: Option<&dyn ProtectionTrigger>,
    post_fill_settle_delay: Duration,
    default_order_execution_timeout: Duration,
) -> Result<EntryOutcome> {
    let market = account
        .market(&intent.symbol)
        .ok_or_else(|| EngineError::MarketNotFound(intent.symbol.clone()))?
        .clone();

    if intent.quantity < market.min_quantity {
        return Err(EngineError::QuantityBelowMinimum {
            symbol: intent.symbol.clone(),
            quantity: intent.quantity,
            min_quantity: market.min_quantity,
        });
    }

    let closing_side = intent.side.opposite();
    let mut working_intent = intent.clone();
    let mut state = EntryState::Init;

    loop {
        state = match state {
            EntryState::Init => {
                debug!("[OrderOps] {} INIT: validated intent, entry={:.6}", intent.symbol, intent.entry_price);
                EntryState::PlaceLimit
            }

            EntryState::PlaceLimit => {
                let sl_price = stop_loss_for_entry(&working_intent, closing_side, bot, account.leverage);
                let client_id = allocator.next_id(bot.bot_id, bot.bot_client_order_id_prefix);

                let body = PlaceOrderRequest {
                    symbol: working_intent.symbol.clone(),
                    side: working_intent.side,
                    order_type: OrderType::Limit,
                    quantity: format_quantity(working_intent.quantity, &market),
                    price: Some(format_price(working_intent.entry_price, &market)),
                    time_in_force: TimeInForce::GoodTilCancel,
                    self_trade_prevention: PlaceOrderRequest::self_trade_prevention_default(),
                    client_id,
                    post_only: bot.enable_post_only,
                    reduce_only: false,
                    stop_loss_trigger_by: Some(PlaceOrderRequest::trigger_by_default()),
                    stop_loss_trigger_price: Some(format_price(sl_price, &market)),
                    stop_loss_limit_price: None,
                    take_profit_trigger_by: None,
                    take_profit_trigger_price: None,
                    take_profit_limit_price: None,
                };

                match exchange.place_order(body, &bot.api_key, &bot.api_secret).await {
                    Ok(ack) => {
                        info!("[OrderOps] {} PLACE_LIMIT ok, clientId={}", working_intent.symbol, ack.client_id);
                        EntryState::Monitor {
                            client_id: ack.client_id,
                            started_at: Instant::now(),
                        }
                    }
                    Err(ExchangeError::WouldMatch(reason)) => {
                        debug!("[OrderOps] {} LIMIT would immediately match ({}), skipping to MARKET", working_intent.symbol, reason);
                        EntryState::MarketFallback
                    }
                    Err(err) => return Err(EngineError::Exchange(err)),
                }
            }

            EntryState::Monitor { client_id, started_at } => {
                // A bot config with no override (0) falls back to the
                // process-wide default instead of a zero-length monitor.
                let timeout = if bot.order_execution_timeout_seconds > 0 {
                    Duration::from_secs(bot.order_execution_timeout_seconds)
                } else {
                    default_order_execution_timeout
                };
                loop {
                    if started_at.elapsed() >= timeout {
                        break;
                    }
                    tokio::time::sleep(MONITOR_POLL_INTERVAL.min(timeout)).await;

                    let orders = exchange
                        .get_open_orders(Some(&working_intent.symbol), &bot.api_key, &bot.api_secret)
                        .await?;
                    let found = orders.iter().find(|o| o.client_id == client_id);
                    match found {
                        None => {
                            // Exchange stopped reporting it among open orders -
                            // treated as filled (it matched and was swept).
                            info!("[OrderOps] {} entry {} filled (no longer open)", working_intent.symbol, client_id);
                            if let Some(trigger) = protection_trigger {
                                trigger.ensure_protection(&working_intent.symbol).await;
                            }
                            return Ok(EntryOutcome::Filled(FilledEntry {
                                order_type: OrderType::Limit,
                                exec_price: working_intent.entry_price,
                                slippage_pct: 0.0,
                                client_id,
                            }));
                        }
                        Some(order) if order.status == crate::domain::OrderStatus::Filled => {
                            info!("[OrderOps] {} entry {} filled", working_intent.symbol, client_id);
                            let post_fill_price = order.limit_price.unwrap_or(working_intent.entry_price);
                            if let Some(trigger) = protection_trigger {
                                trigger.ensure_protection(&working_intent.symbol).await;
                            }
                            return Ok(EntryOutcome::Filled(FilledEntry {
                                order_type: OrderType::Limit,
                                exec_price: post_fill_price,
                                slippage_pct: 0.0,
                                client_id,
                            }));
                        }
                        Some(_) => continue,
                    }
                }
                EntryState::CancelAndRevalidate { client_id }
            }

            EntryState::CancelAndRevalidate { client_id } => {
                if let Err(err) = exchange
                    .cancel_order(&working_intent.symbol, "", Some(client_id), &bot.api_key, &bot.api_secret)
                    .await
                {
                    warn!("[OrderOps] {} cancel of timed-out LIMIT {} failed: {}", working_intent.symbol, client_id, err);
                }

                if let Some(revalidator) = revalidator {
                    match revalidator.revalidate(&working_intent, bot).await? {
                        Some(revalidated) => working_intent = revalidated,
                        None => return Ok(EntryOutcome::Aborted(EngineError::SignalMismatch)),
                    }
                }

                let marks = exchange
                    .get_all_mark_prices(Some(std::slice::from_ref(&working_intent.symbol)))
                    .await?;
                let mark_price = marks
                    .into_iter()
                    .find(|(symbol, _)| *symbol == working_intent.symbol)
                    .map(|(_, price)| price)
                    .unwrap_or(working_intent.entry_price);

                let slippage = slippage_pct(mark_price, intent.entry_price);
                if slippage > bot.max_slippage_pct {
                    return Ok(EntryOutcome::Aborted(EngineError::SlippageExceeded {
                        actual_pct: slippage,
                        max_pct: bot.max_slippage_pct,
                    }));
                }

                EntryState::MarketFallback
            }

            EntryState::MarketFallback => {
                if !bot.enable_market_fallback {
                    return Ok(EntryOutcome::Aborted(EngineError::FallbackDisabled));
                }

                let sl_price = stop_loss_for_entry(&working_intent, closing_side, bot, account.leverage);
                let client_id = allocator.next_id(bot.bot_id, bot.bot_client_order_id_prefix);

                let body = PlaceOrderRequest {
                    symbol: working_intent.symbol.clone(),
                    side: working_intent.side,
                    order_type: OrderType::Market,
                    quantity: format_quantity(working_intent.quantity, &market),
                    price: None,
                    time_in_force: TimeInForce::ImmediateOrCancel,
                    self_trade_prevention: PlaceOrderRequest::self_trade_prevention_default(),
                    client_id,
                    post_only: false,
                    reduce_only: false,
                    stop_loss_trigger_by: Some(PlaceOrderRequest::trigger_by_default()),
                    stop_loss_trigger_price: Some(format_price(sl_price, &market)),
                    stop_loss_limit_price: None,
                    take_profit_trigger_by: None,
                    take_profit_trigger_price: None,
                    take_profit_limit_price: None,
                };

                match exchange.place_order(body, &bot.api_key, &bot.api_secret).await {
                    Ok(ack) => {
                        let marks = exchange
                            .get_all_mark_prices(Some(std::slice::from_ref(&working_intent.symbol)))
                            .await?;
                        let mark_price = marks
                            .into_iter()
                            .find(|(symbol, _)| *symbol == working_intent.symbol)
                            .map(|(_, price)| price)
                            .unwrap_or(working_intent.entry_price);
                        let slippage = slippage_pct(mark_price, intent.entry_price);
                        info!("[OrderOps] {} MARKET fallback filled, slippage={:.4}%", working_intent.symbol, slippage);
                        EntryState::PostFill {
                            client_id: ack.client_id,
                            exec_price: mark_price,
                            slippage_pct: slippage,
                        }
                    }
                    Err(err) => return Err(EngineError::Exchange(err)),
                }
            }

            EntryState::PostFill { client_id, exec_price, slippage_pct } => {
                // MARKET_FALLBACK schedules POST_FILL +settle delay (spec
                // §4.3: "schedule POST_FILL +2s") so the exchange has had a
                // moment to register the position before it is queried.
                if !post_fill_settle_delay.is_zero() {
                    tokio::time::sleep(post_fill_settle_delay).await;
                }
                if let Some(trigger) = protection_trigger {
                    trigger.ensure_protection(&working_intent.symbol).await;
                }
                return Ok(EntryOutcome::Filled(FilledEntry {
                    order_type: OrderType::Market,
                    exec_price,
                    slippage_pct,
                    client_id,
                }));
            }
        };
    }
}

fn stop_loss_for_entry(intent: &OrderIntent, closing_side: OrderSide, bot: &BotConfig, leverage: f64) -> f64 {
    let failsafe = failsafe_stop_price(intent.entry_price, closing_side, bot.max_negative_pnl_stop_pct, leverage);
    more_protective_stop(closing_side, failsafe, intent.stop_price)
}

/// `|markPrice - intendedEntry| / intendedEntry * 100` (spec §4.3).
fn slippage_pct(mark_price: f64, intended_entry: f64) -> f64 {
    (mark_price - intended_entry).abs() / intended_entry * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use crate::testing::mock_exchange::MockExchangeClient;
    use crate::testing::sample_bot_config;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    fn account() -> AccountSnapshot {
        let mut markets = HashMap::new();
        markets.insert(
            "BTC_USDC_PERP".to_string(),
            crate::domain::Market {
                symbol: "BTC_USDC_PERP".to_string(),
                tick_size: 0.01,
                step_size: 0.001,
                decimal_price: 2,
                decimal_quantity: 3,
                min_quantity: 0.001,
                maker_fee: 0.0002,
                market_type: crate::domain::MarketType::Perp,
                order_book_state: crate::domain::OrderBookState::Open,
            },
        );
        AccountSnapshot::new(10_000.0, 10.0, 0.0002, markets)
    }

    fn intent() -> OrderIntent {
        OrderIntent {
            symbol: "BTC_USDC_PERP".to_string(),
            side: OrderSide::Bid,
            entry_price: 100.0,
            stop_price: 99.0,
            target_price: Some(100.05),
            quantity: 0.5,
            original_signal_data: serde_json::json!({}),
            expected_pnl: 1.0,
        }
    }

    #[tokio::test]
    async fn happy_path_limit_fill() {
        let mock = Arc::new(MockExchangeClient::new());
        let exchange: Arc<dyn ExchangeClient> = mock.clone();
        let allocator = OrderIdAllocator::new();
        let bot = sample_bot_config();
        let acc = account();
        let it = intent();

        let mock_fill = mock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let orders = mock_fill.open_orders_snapshot();
            if let Some(order) = orders.first() {
                mock_fill.fill_order(order.client_id);
            }
        });

        let outcome = open_entry(&it, &bot, &acc, &exchange, &allocator, None, None, Duration::from_millis(1), Duration::from_secs(12)).await.unwrap();
        match outcome {
            EntryOutcome::Filled(f) => assert_eq!(f.order_type, OrderType::Limit),
            other => panic!("expected fill, got {:?}", other),
        }
        assert_eq!(mock.place_order_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn would_match_skips_straight_to_market() {
        let mock = Arc::new(MockExchangeClient::new());
        mock.fail_next_place_order(ExchangeError::WouldMatch("crosses book".to_string()));
        let exchange: Arc<dyn ExchangeClient> = mock.clone();
        let allocator = OrderIdAllocator::new();
        let bot = sample_bot_config();
        let acc = account();
        let it = intent();

        let outcome = open_entry(&it, &bot, &acc, &exchange, &allocator, None, None, Duration::from_millis(1), Duration::from_secs(12)).await.unwrap();
        match outcome {
            EntryOutcome::Filled(f) => assert_eq!(f.order_type, OrderType::Market),
            other => panic!("expected market fill, got {:?}", other),
        }
        // one failed LIMIT attempt + one successful MARKET attempt.
        assert_eq!(mock.place_order_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fallback_disabled_aborts_without_market_order() {
        let mock = Arc::new(MockExchangeClient::new());
        mock.fail_next_place_order(ExchangeError::WouldMatch("crosses book".to_string()));
        let exchange: Arc<dyn ExchangeClient> = mock.clone();
        let allocator = OrderIdAllocator::new();
        let mut bot = sample_bot_config();
        bot.enable_market_fallback = false;
        let acc = account();
        let it = intent();

        let outcome = open_entry(&it, &bot, &acc, &exchange, &allocator, None, None, Duration::from_millis(1), Duration::from_secs(12)).await.unwrap();
        assert_eq!(outcome, EntryOutcome::Aborted(EngineError::FallbackDisabled));
        assert_eq!(mock.place_order_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slippage_exceeded_aborts_after_timeout() {
        let mock = Arc::new(MockExchangeClient::new());
        mock.set_mark_price("BTC_USDC_PERP", 100.25);
        let exchange: Arc<dyn ExchangeClient> = mock.clone();
        let allocator = OrderIdAllocator::new();
        let mut bot = sample_bot_config();
        bot.order_execution_timeout_seconds = 1;
        bot.max_slippage_pct = 0.2;
        let acc = account();
        let it = intent();

        let outcome = open_entry(&it, &bot, &acc, &exchange, &allocator, None, None, Duration::from_millis(1), Duration::from_secs(12)).await.unwrap();
        match outcome {
            EntryOutcome::Aborted(EngineError::SlippageExceeded { actual_pct, max_pct }) => {
                assert!(actual_pct > max_pct);
            }
            other => panic!("expected slippage abort, got {:?}", other),
        }
        // LIMIT placed and timed out; no MARKET order follows an aborted revalidation.
        assert_eq!(mock.place_order_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slippage_matches_scenario_two() {
        // entry=100.00, mark=100.15 -> slippage ~0.15%.
        let pct = slippage_pct(100.15, 100.0);
        assert!((pct - 0.15).abs() < 1e-9);
    }
}
