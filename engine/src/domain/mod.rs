//! Domain entities and errors
//!
//! Contains the business entities shared by every engine component: market
//! metadata, account snapshots, per-bot configuration, order/position shapes
//! mirrored from the exchange, and the order intents strategies emit.

pub mod account;
pub mod bot_config;
pub mod ids;
pub mod intent;
pub mod market;
pub mod order;
pub mod position;

pub use account::AccountSnapshot;
pub use bot_config::{BotConfig, BotKey, BotStatus, ExecutionMode};
pub use ids::{BotId, ClientOrderId};
pub use intent::OrderIntent;
pub use market::{Market, MarketType, OrderBookState};
pub use order::{OpenOrder, OrderSide, OrderStatus, OrderType};
pub use position::{is_correctly_positioned, OpenPosition, ProtectionKind};
