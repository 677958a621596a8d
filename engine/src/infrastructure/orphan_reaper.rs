//! OrphanReaper (C6)
//!
//! Cancels stop-loss / take-profit orders whose underlying position has
//! already closed (spec §4.5). Grounded on the reference codebase's
//! reconciliation task: a periodic sweep with exponential backoff on error,
//! reset to the base cadence on success.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{BotConfig, OpenOrder, OrderStatus};
use crate::error::Result;
use crate::infrastructure::exchange_client::ExchangeClient;

/// Backoff schedule for the periodic reconciliation task (spec §4.5
/// "slow periodic cadence").
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationConfig {
    pub base_interval: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(120),
            max_backoff: Duration::from_secs(900),
        }
    }
}

pub struct OrphanReaper {
    exchange: Arc<dyn ExchangeClient>,
}

impl OrphanReaper {
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { exchange }
    }

    /// One reconciliation sweep for `bot`: cancels every reduce-only
    /// protection order on an authorized symbol that has no corresponding
    /// open position (spec §4.5 algorithm). Returns the number cancelled.
    ///
    /// The filter is conservative by construction: a symbol is only acted on
    /// when it has *no* open position at all, never "recently closed" (spec
    /// §4.5 invariant).
    pub async fn reap(&self, bot: &BotConfig) -> Result<usize> {
        let positions = self.exchange.get_open_positions(&bot.api_key, &bot.api_secret).await?;
        let open_symbols: HashSet<&str> = positions
            .iter()
            .filter(|p| !p.is_flat())
            .map(|p| p.symbol.as_str())
            .collect();

        let orders = self.exchange.get_open_orders(None, &bot.api_key, &bot.api_secret).await?;
        let orphans: Vec<&OpenOrder> = orders
            .iter()
            .filter(|o| o.belongs_to(bot))
            .filter(|o| bot.is_authorized(&o.symbol))
            .filter(|o| is_protection_shaped(o))
            .filter(|o| !open_symbols.contains(o.symbol.as_str()))
            .collect();

        let mut cancelled = 0;
        for order in orphans {
            match self
                .exchange
                .cancel_order(&order.symbol, &order.id, Some(order.client_id), &bot.api_key, &bot.api_secret)
                .await
            {
                Ok(()) => {
                    info!("[OrphanReaper] cancelled orphaned order {} on {}", order.client_id, order.symbol);
                    cancelled += 1;
                }
                Err(err) => warn!("[OrphanReaper] failed to cancel orphan {} on {}: {}", order.client_id, order.symbol, err),
            }
        }
        Ok(cancelled)
    }
}

fn is_protection_shaped(order: &OpenOrder) -> bool {
    order.reduce_only
        && order.status.is_live()
        && (order.has_stop_loss_trigger() || order.has_take_profit_trigger() || order.status == OrderStatus::TriggerPending)
}

/// Spawns the periodic reconciliation loop for `bot`, backing off on error up
/// to `config.max_backoff` and resetting to `config.base_interval` on the
/// first subsequent success (modeled on the reference codebase's
/// `spawn_position_reconciliation_task`).
pub fn spawn_reconciliation_task(
    reaper: Arc<OrphanReaper>,
    bot: BotConfig,
    config: ReconciliationConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = config.base_interval;
        loop {
            tokio::time::sleep(interval).await;
            match reaper.reap(&bot).await {
                Ok(cancelled) => {
                    if cancelled > 0 {
                        info!("[OrphanReaper] bot {} reaped {} orphan(s)", bot.bot_id, cancelled);
                    }
                    interval = config.base_interval;
                }
                Err(err) => {
                    warn!("[OrphanReaper] bot {} reconciliation sweep failed: {}", bot.bot_id, err);
                    interval = (interval * 2).min(config.max_backoff);
                }
            }
        }
    })
}
