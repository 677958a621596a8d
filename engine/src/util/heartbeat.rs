//! Heartbeat logging for long-running processes
//!
//! Generalizes the reference codebase's single-process heartbeat helper so
//! `BotSupervisor` can emit one periodic summary line (bots running,
//! maintenance state) without a per-tick log line per bot (spec §4.7, SPEC_FULL A6).

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Tracks heartbeat intervals for periodic status logging.
pub struct Heartbeat {
    interval: Duration,
    last_beat: DateTime<Utc>,
}

impl Heartbeat {
    /// Create a new heartbeat with the given interval in seconds.
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            last_beat: Utc::now(),
        }
    }

    /// Check if enough time has passed since the last beat.
    pub fn should_beat(&self) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_beat);
        elapsed.to_std().unwrap_or_default() >= self.interval
    }

    /// Record a heartbeat at the current time.
    pub fn beat(&mut self) {
        self.last_beat = Utc::now();
    }

    /// Reset the heartbeat timer (alias for `beat`).
    pub fn reset(&mut self) {
        self.beat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_beat_before_interval_elapses() {
        let hb = Heartbeat::new(300);
        assert!(!hb.should_beat());
    }

    #[test]
    fn beats_immediately_with_zero_interval() {
        let hb = Heartbeat::new(0);
        assert!(hb.should_beat());
    }

    #[test]
    fn reset_postpones_next_beat() {
        let mut hb = Heartbeat::new(0);
        assert!(hb.should_beat());
        hb.reset();
        assert!(hb.should_beat()); // interval is still 0s, so it beats again immediately
    }
}
