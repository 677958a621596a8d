//! Graceful shutdown management
//!
//! Generalizes the reference codebase's single-websocket-task shutdown
//! manager to drive every `BotRunner` task instead of one connection
//! (spec §4.7 "Cancellation & timeouts", SPEC_FULL A5): a bot checks
//! `is_running()` between entries and between ticks rather than being
//! hard-aborted mid-tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::sleep;
use tracing::info;

/// Manages graceful shutdown for long-running processes.
pub struct ShutdownManager {
    flag: Arc<AtomicBool>,
}

impl ShutdownManager {
    /// Create a new shutdown manager in the running state.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawn a Ctrl+C signal handler that triggers shutdown.
    pub fn spawn_signal_handler(&self) {
        let flag = Arc::clone(&self.flag);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal (Ctrl+C), shutting down gracefully");
                flag.store(false, Ordering::Release);
            }
        });
    }

    /// Check if the process should continue running.
    pub fn is_running(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Get a clone of the shutdown flag for passing to async tasks.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Sleep for a duration, but wake early if shutdown is triggered.
    pub async fn interruptible_sleep(&self, duration: Duration) {
        let check_interval = Duration::from_millis(50);
        let mut elapsed = Duration::ZERO;

        while elapsed < duration && self.is_running() {
            sleep(check_interval.min(duration - elapsed)).await;
            elapsed += check_interval;
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_running() {
        let shutdown = ShutdownManager::new();
        assert!(shutdown.is_running());
    }

    #[tokio::test]
    async fn flag_clone_reflects_shutdown() {
        let shutdown = ShutdownManager::new();
        let flag = shutdown.flag();
        flag.store(false, Ordering::Release);
        assert!(!shutdown.is_running());
    }

    #[tokio::test]
    async fn interruptible_sleep_returns_early_on_shutdown() {
        let shutdown = Arc::new(ShutdownManager::new());
        let flag = shutdown.flag();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.interruptible_sleep(Duration::from_secs(10)).await;
            })
        };
        sleep(Duration::from_millis(20)).await;
        flag.store(false, Ordering::Release);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("interruptible_sleep should return promptly after shutdown")
            .unwrap();
    }
}
