//! Small cross-cutting helpers that do not belong to any one component.

pub mod heartbeat;
pub mod shutdown;
pub mod timeframe;

pub use heartbeat::Heartbeat;
pub use shutdown::ShutdownManager;
