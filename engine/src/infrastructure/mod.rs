//! Infrastructure layer
//!
//! Everything that talks to the exchange or coordinates concurrent access to
//! shared process state: the account cache/rate-limit broker, the order-id
//! allocator, the entry state machine, the position protector, and the
//! orphan reaper (spec §4).

pub mod account_cache;
pub mod exchange_client;
pub mod order_id_allocator;
pub mod order_ops;
pub mod orphan_reaper;
pub mod position_protector;

pub use account_cache::AccountCache;
pub use exchange_client::ExchangeClient;
pub use order_id_allocator::OrderIdAllocator;
pub use orphan_reaper::OrphanReaper;
pub use position_protector::PositionProtector;
