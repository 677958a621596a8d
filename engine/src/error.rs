//! Error taxonomy
//!
//! Every fallible engine API returns `Result<T, EngineError>`. Kinds mirror
//! spec §7 one-to-one so callers can match on kind instead of string-sniffing
//! ("exceptions-as-control-flow" from the original, per spec §9, becomes
//! explicit result values here).

use thiserror::Error;

/// Errors surfaced by `ExchangeClient` methods (spec §6: "all methods
/// fallible... distinguish at minimum: rate-limit, transient, would-match,
/// validation, authentication, not-found").
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("order would immediately match: {0}")]
    WouldMatch(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ExchangeError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExchangeError::RateLimited(_) => "rate_limited",
            ExchangeError::Transient(_) => "transient",
            ExchangeError::WouldMatch(_) => "would_match",
            ExchangeError::Validation(_) => "validation",
            ExchangeError::Auth(_) => "auth",
            ExchangeError::NotFound(_) => "not_found",
        }
    }
}

/// Engine-internal error wrapping `ExchangeError` plus conditions that never
/// reach the exchange at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("lock contended for symbol {0}, another caller is handling it")]
    LockContended(String),

    #[error("market not found: {0}")]
    MarketNotFound(String),

    #[error("quantity below minimum for {symbol}: {quantity} < {min_quantity}")]
    QuantityBelowMinimum {
        symbol: String,
        quantity: f64,
        min_quantity: f64,
    },

    #[error("signal no longer matches during revalidation")]
    SignalMismatch,

    #[error("slippage {actual_pct:.4}% exceeds max {max_pct:.4}%")]
    SlippageExceeded { actual_pct: f64, max_pct: f64 },

    #[error("market fallback disabled")]
    FallbackDisabled,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
