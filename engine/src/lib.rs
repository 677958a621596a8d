//! perp-bot-engine core
//!
//! The exchange-agnostic trading core: account/rate-limit caching, order-id
//! allocation, the hybrid LIMIT-then-MARKET entry state machine, position
//! protection, orphan cleanup, and the per-bot scheduler/supervisor that
//! composes them. The concrete exchange transport and persistence layer are
//! out of scope - `infrastructure::exchange_client::ExchangeClient` is the
//! seam an integrator plugs a real exchange SDK into.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{EngineError, Result};
