//! In-memory `ExchangeClient` used by the engine's own test suite, and - via
//! the `testing` feature - by the `run_supervisor`/`force_sync` binaries when
//! no real exchange SDK is wired in.
//!
//! Not a teaching example of a production exchange integration: order books
//! never move on their own, fills only ever happen when something calls
//! `fill_order` explicitly. It exists so `AccountCache`, `OrderOps`,
//! `PositionProtector` and `OrphanReaper` can be exercised deterministically
//! without a network, and so the binaries have something concrete to run
//! against (spec §1 - the real exchange transport is out of scope).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{
    ClientOrderId, Market, MarketType, OpenOrder, OpenPosition, OrderBookState, OrderStatus,
};
use crate::error::ExchangeError;
use crate::infrastructure::exchange_client::{
    AccountRaw, Candle, CollateralRaw, ExchangeClient, Fill, PlaceOrderAck, PlaceOrderRequest,
};

pub struct MockExchangeClient {
    pub account_calls: AtomicUsize,
    pub place_order_calls: AtomicUsize,
    pub cancel_order_calls: AtomicUsize,

    account_call_delay: Mutex<Duration>,
    next_account_failure: Mutex<Option<ExchangeError>>,
    next_place_order_failure: Mutex<Option<ExchangeError>>,

    markets: Mutex<Vec<Market>>,
    mark_prices: Mutex<HashMap<String, f64>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    open_positions: Mutex<Vec<OpenPosition>>,
    fills: Mutex<Vec<Fill>>,

    account: Mutex<AccountRaw>,
    next_order_seq: AtomicI64,
}

impl MockExchangeClient {
    pub fn new() -> Self {
        Self {
            account_calls: AtomicUsize::new(0),
            place_order_calls: AtomicUsize::new(0),
            cancel_order_calls: AtomicUsize::new(0),
            account_call_delay: Mutex::new(Duration::ZERO),
            next_account_failure: Mutex::new(None),
            next_place_order_failure: Mutex::new(None),
            markets: Mutex::new(default_markets()),
            mark_prices: Mutex::new(HashMap::from([
                ("BTC_USDC_PERP".to_string(), 100.0),
                ("ETH_USDC_PERP".to_string(), 20.0),
            ])),
            open_orders: Mutex::new(Vec::new()),
            open_positions: Mutex::new(Vec::new()),
            fills: Mutex::new(Vec::new()),
            account: Mutex::new(AccountRaw {
                net_equity_available: 10_000.0,
                leverage: 10.0,
                maker_fee: 0.0002,
            }),
            next_order_seq: AtomicI64::new(1),
        }
    }

    pub fn set_account_call_delay(&self, delay: Duration) {
        *self.account_call_delay.lock().unwrap() = delay;
    }

    pub fn fail_next_account_call(&self, err: ExchangeError) {
        *self.next_account_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_next_place_order(&self, err: ExchangeError) {
        *self.next_place_order_failure.lock().unwrap() = Some(err);
    }

    pub fn set_mark_price(&self, symbol: &str, price: f64) {
        self.mark_prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn push_open_order(&self, order: OpenOrder) {
        self.open_orders.lock().unwrap().push(order);
    }

    pub fn set_open_positions(&self, positions: Vec<OpenPosition>) {
        *self.open_positions.lock().unwrap() = positions;
    }

    pub fn push_fill(&self, fill: Fill) {
        self.fills.lock().unwrap().push(fill);
    }

    pub fn open_orders_snapshot(&self) -> Vec<OpenOrder> {
        self.open_orders.lock().unwrap().clone()
    }

    /// Mark the order matching `client_id` as filled, as if the exchange
    /// matched it between two poll cycles.
    pub fn fill_order(&self, client_id: ClientOrderId) {
        let mut orders = self.open_orders.lock().unwrap();
        for order in orders.iter_mut() {
            if order.client_id == client_id {
                order.status = OrderStatus::Filled;
            }
        }
    }
}

impl Default for MockExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

fn default_markets() -> Vec<Market> {
    vec![
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
        },
        Market {
            symbol: "ETH_USDC_PERP".to_string(),
            tick_size: 0.01,
            step_size: 0.01,
            decimal_price: 2,
            decimal_quantity: 2,
            min_quantity: 0.01,
            maker_fee: 0.0002,
            market_type: MarketType::Perp,
            order_book_state: OrderBookState::Open,
        },
    ]
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn get_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        Ok(self.markets.lock().unwrap().clone())
    }

    async fn get_all_mark_prices(&self, symbols: Option<&[String]>) -> Result<Vec<(String, f64)>, ExchangeError> {
        let prices = self.mark_prices.lock().unwrap();
        let result = match symbols {
            Some(symbols) => symbols
                .iter()
                .filter_map(|s| prices.get(s).map(|p| (s.clone(), *p)))
                .collect(),
            None => prices.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        };
        Ok(result)
    }

    async fn get_klines(&self, _symbol: &str, _timeframe: &str, n: usize) -> Result<Vec<Candle>, ExchangeError> {
        let now = Utc::now();
        Ok((0..n)
            .map(|i| Candle {
                open_time: now - chrono::Duration::minutes(i as i64),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 10.0,
            })
            .collect())
    }

    async fn get_account(&self, _api_key: &str, _api_secret: &str) -> Result<AccountRaw, ExchangeError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.account_call_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.next_account_failure.lock().unwrap().take() {
            return Err(err);
        }

        Ok(self.account.lock().unwrap().clone())
    }

    async fn get_collateral(&self, _api_key: &str, _api_secret: &str) -> Result<CollateralRaw, ExchangeError> {
        Ok(CollateralRaw { available: 10_000.0 })
    }

    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
        _api_key: &str,
        _api_secret: &str,
    ) -> Result<Vec<OpenOrder>, ExchangeError> {
        let orders = self.open_orders.lock().unwrap();
        Ok(orders
            .iter()
            .filter(|o| symbol.map(|s| s == o.symbol).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_open_positions(&self, _api_key: &str, _api_secret: &str) -> Result<Vec<OpenPosition>, ExchangeError> {
        Ok(self.open_positions.lock().unwrap().clone())
    }

    async fn place_order(
        &self,
        body: PlaceOrderRequest,
        _api_key: &str,
        _api_secret: &str,
    ) -> Result<PlaceOrderAck, ExchangeError> {
        self.place_order_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.next_place_order_failure.lock().unwrap().take() {
            return Err(err);
        }

        let id = self.next_order_seq.fetch_add(1, Ordering::SeqCst);
        let exchange_order_id = format!("mock-order-{}", id);

        let order = OpenOrder {
            id: exchange_order_id.clone(),
            client_id: body.client_id,
            symbol: body.symbol,
            side: body.side,
            order_type: body.order_type,
            limit_price: body.price.as_deref().and_then(|p| p.parse().ok()),
            quantity: body.quantity.parse().unwrap_or(0.0),
            reduce_only: body.reduce_only,
            stop_loss_trigger_price: body.stop_loss_trigger_price.as_deref().and_then(|p| p.parse().ok()),
            take_profit_trigger_price: body.take_profit_trigger_price.as_deref().and_then(|p| p.parse().ok()),
            status: OrderStatus::New,
            created_at: Utc::now(),
        };
        self.open_orders.lock().unwrap().push(order);

        Ok(PlaceOrderAck {
            id: exchange_order_id,
            client_id: body.client_id,
        })
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        order_id: &str,
        client_id: Option<ClientOrderId>,
        _api_key: &str,
        _api_secret: &str,
    ) -> Result<(), ExchangeError> {
        self.cancel_order_calls.fetch_add(1, Ordering::SeqCst);
        let mut orders = self.open_orders.lock().unwrap();
        let before = orders.len();
        orders.retain(|o| {
            let matches_id = o.id == order_id;
            let matches_client = client_id.map(|c| c == o.client_id).unwrap_or(false);
            !(matches_id || matches_client)
        });
        if orders.len() == before {
            // Cancelling an already-gone order is treated as success
            // (spec §7 NotFound "treated as success for cancel").
            return Ok(());
        }
        Ok(())
    }

    async fn get_fill_history(
        &self,
        symbol: &str,
        _api_key: &str,
        _api_secret: &str,
    ) -> Result<Vec<Fill>, ExchangeError> {
        Ok(self
            .fills
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.symbol == symbol)
            .cloned()
            .collect())
    }
}
