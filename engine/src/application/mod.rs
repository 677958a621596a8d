//! Application layer: `BotRunner` (C7) and `BotSupervisor` (C8), plus the
//! `Strategy`/`MacroAnalyzer` capability seam they drive (spec §4.6, §4.7).

pub mod bot_runner;
pub mod bot_supervisor;
pub mod strategy;

pub use bot_runner::BotRunner;
pub use bot_supervisor::{BotStatusView, BotSupervisor};
pub use strategy::{MacroAnalyzer, MacroTrend, NoopStrategy, Strategy, StrategyRegistry, SymbolDataset, TrendDirection};
