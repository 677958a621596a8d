//! Tracing setup shared by every binary in this crate.

use tracing_subscriber::EnvFilter;

/// Initialize tracing at `info` level, honoring `RUST_LOG` if set.
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Initialize tracing with a specific default level.
///
/// The level can be: error, warn, info, debug, trace. `RUST_LOG` overrides
/// the configured level when set.
pub fn init_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("engine={level},perp_bot_engine={level},{level}", level = level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();
}
