//! ExchangeClient contract
//!
//! The abstract capability set every engine component calls through. The
//! concrete HTTP/WebSocket transport is out of scope (spec §1); this trait is
//! the seam an implementer plugs a real exchange SDK into.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ClientOrderId, Market, OpenOrder, OpenPosition};
use crate::error::ExchangeError;

/// A single OHLC candle (spec §6 `getKLines`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Raw account payload (spec §6 `getAccount`), pre-derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRaw {
    pub net_equity_available: f64,
    pub leverage: f64,
    pub maker_fee: f64,
}

/// Raw collateral payload (spec §6 `getCollateral`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollateralRaw {
    pub available: f64,
}

/// A historical fill (spec §6 `getFillHistory`).
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub symbol: String,
    pub client_id: ClientOrderId,
    pub price: f64,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
}

/// Time-in-force for `placeOrder` (spec §6 order placement body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    GoodTilCancel,
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
}

/// The bit-exact order placement body the core produces (spec §6 table).
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: crate::domain::OrderSide,
    pub order_type: crate::domain::OrderType,
    /// Stepsize-aligned quantity, formatted as a string per exchange convention.
    pub quantity: String,
    /// Tick-aligned limit price, present for LIMIT orders.
    pub price: Option<String>,
    pub time_in_force: TimeInForce,
    pub self_trade_prevention: &'static str,
    pub client_id: ClientOrderId,
    pub post_only: bool,
    pub reduce_only: bool,
    pub stop_loss_trigger_by: Option<&'static str>,
    pub stop_loss_trigger_price: Option<String>,
    pub stop_loss_limit_price: Option<String>,
    pub take_profit_trigger_by: Option<&'static str>,
    pub take_profit_trigger_price: Option<String>,
    pub take_profit_limit_price: Option<String>,
}

impl PlaceOrderRequest {
    pub fn self_trade_prevention_default() -> &'static str {
        "RejectTaker"
    }

    pub fn trigger_by_default() -> &'static str {
        "LastPrice"
    }
}

/// Acknowledgement from a successful `placeOrder` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderAck {
    pub id: String,
    pub client_id: ClientOrderId,
}

/// Opaque capability set: market metadata, mark prices, candles, account
/// snapshot, open orders, open positions, place/cancel order, fill history
/// (spec §6).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_markets(&self) -> Result<Vec<Market>, ExchangeError>;

    async fn get_all_mark_prices(&self, symbols: Option<&[String]>) -> Result<Vec<(String, f64)>, ExchangeError>;

    async fn get_klines(&self, symbol: &str, timeframe: &str, n: usize) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_account(&self, api_key: &str, api_secret: &str) -> Result<AccountRaw, ExchangeError>;

    async fn get_collateral(&self, api_key: &str, api_secret: &str) -> Result<CollateralRaw, ExchangeError>;

    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
        api_key: &str,
        api_secret: &str,
    ) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn get_open_positions(&self, api_key: &str, api_secret: &str) -> Result<Vec<OpenPosition>, ExchangeError>;

    async fn place_order(
        &self,
        body: PlaceOrderRequest,
        api_key: &str,
        api_secret: &str,
    ) -> Result<PlaceOrderAck, ExchangeError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
        client_id: Option<ClientOrderId>,
        api_key: &str,
        api_secret: &str,
    ) -> Result<(), ExchangeError>;

    async fn get_fill_history(
        &self,
        symbol: &str,
        api_key: &str,
        api_secret: &str,
    ) -> Result<Vec<Fill>, ExchangeError>;
}
