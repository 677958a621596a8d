//! OrderOps (C4)
//!
//! Stateless helpers: price/quantity rounding to market tick/step, the
//! hybrid LIMIT-then-MARKET entry state machine, and the stop-loss/
//! take-profit price formulas shared with `PositionProtector` (spec §4.3).

pub mod entry;
pub mod protection;
pub mod rounding;

pub use entry::{open_entry, EntryOutcome, FilledEntry, ProtectionTrigger, Revalidator};
