//! perp-bot-engine binary crate
//!
//! Re-exports the `engine` library and carries the small amount of
//! per-process wiring (`config loading`, logging setup) shared by the
//! `run_supervisor` and `force_sync` binaries - mirrors the reference
//! codebase's `bin_common` module.

pub use engine;

pub mod bin_common {
    pub mod cli;
    pub mod logging;

    pub use cli::{load_bot_configs, load_engine_config, load_config_from_env, parse_args, ConfigType};
    pub use logging::{init_logging, init_logging_with_level};
}
