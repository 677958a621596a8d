//! BotSupervisor (C8)
//!
//! Process-wide registry of `BotRunner`s: start/stop/restart, a global
//! "maintenance" flag every runner checks before touching the exchange, and
//! the `force_sync` control-surface hook (spec §4.7, §6 "CLI / control
//! surface"). Mirrors the reference codebase's facade-owns-tasks pattern -
//! the supervisor holds the `JoinHandle` for every runner it spawned and is
//! the only thing that aborts or awaits them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::bot_runner::BotRunner;
use crate::application::strategy::{MacroAnalyzer, Strategy, StrategyRegistry};
use crate::config::EngineConfig;
use crate::domain::{BotConfig, BotId, BotStatus};
use crate::error::{EngineError, Result};
use crate::infrastructure::orphan_reaper::{spawn_reconciliation_task, ReconciliationConfig};
use crate::infrastructure::{AccountCache, ExchangeClient, OrderIdAllocator, OrphanReaper, PositionProtector};
use crate::util::ShutdownManager;

struct BotHandle {
    runner: Arc<BotRunner>,
    task: JoinHandle<()>,
    /// The slow, supervisor-driven orphan sweep, independent of the bot's own
    /// tick cadence (spec §4.5 "on a slow periodic cadence from
    /// BotSupervisor", as opposed to the per-tick reap gated by
    /// `enable_orphan_order_monitor`).
    reconciliation_task: JoinHandle<()>,
    shutdown: Arc<ShutdownManager>,
    /// Set for the lifetime of a graceful restart: the dashboard's "is this
    /// bot restarting" signal (spec §7 "User-visible failure behavior").
    restarting: Arc<AtomicBool>,
}

/// What the dashboard is allowed to see about a bot (spec §7).
#[derive(Debug, Clone, PartialEq)]
pub struct BotStatusView {
    pub bot_id: BotId,
    pub status: BotStatus,
    pub next_validation_at: chrono::DateTime<chrono::Utc>,
    pub is_restarting: bool,
}

/// Owns every `BotRunner` sharing this process's `AccountCache` and the
/// other C2-C6 components, plus the global maintenance switch (spec §4.7).
pub struct BotSupervisor {
    exchange: Arc<dyn ExchangeClient>,
    account_cache: Arc<AccountCache>,
    allocator: Arc<OrderIdAllocator>,
    position_protector: Arc<PositionProtector>,
    orphan_reaper: Arc<OrphanReaper>,
    engine_config: EngineConfig,
    strategies: StrategyRegistry,
    maintenance: Arc<AtomicBool>,
    bots: DashMap<BotId, BotHandle>,
    /// Bots an `Auth` error has stopped and that need a manual restart (spec
    /// §7 "Auth - fatal for the bot; bot transitions to stopped and
    /// supervisor is notified").
    auth_failures: Arc<DashSet<BotId>>,
    auth_failure_tx: mpsc::UnboundedSender<BotId>,
    _auth_failure_drain: JoinHandle<()>,
}

impl BotSupervisor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, engine_config: EngineConfig, strategies: StrategyRegistry) -> Self {
        let allocator = Arc::new(OrderIdAllocator::new());
        let auth_failures = Arc::new(DashSet::new());
        let (auth_failure_tx, mut auth_failure_rx) = mpsc::unbounded_channel::<BotId>();
        let drain_set = auth_failures.clone();
        let auth_failure_drain = tokio::spawn(async move {
            while let Some(bot_id) = auth_failure_rx.recv().await {
                warn!("[BotSupervisor] bot {} needs a manual restart after an auth failure", bot_id);
                drain_set.insert(bot_id);
            }
        });
        Self {
            account_cache: Arc::new(AccountCache::new(exchange.clone(), engine_config.clone())),
            position_protector: Arc::new(PositionProtector::new(
                exchange.clone(),
                allocator.clone(),
                engine_config.protection_check_cache(),
            )),
            orphan_reaper: Arc::new(OrphanReaper::new(exchange.clone())),
            exchange,
            allocator,
            engine_config,
            strategies,
            maintenance: Arc::new(AtomicBool::new(false)),
            bots: DashMap::new(),
            auth_failures,
            auth_failure_tx,
            _auth_failure_drain: auth_failure_drain,
        }
    }

    /// Whether `bot_id` was stopped by an `Auth` error and still awaits a
    /// manual restart (spec §7).
    pub fn needs_manual_restart(&self, bot_id: BotId) -> bool {
        self.auth_failures.contains(&bot_id)
    }

    /// Sets the process-wide maintenance flag. While set, every `BotRunner`
    /// short-circuits its tick before any exchange call (spec §4.7).
    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::Release);
        info!("[BotSupervisor] maintenance mode {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Acquire)
    }

    /// Spawns a `BotRunner` task for `bot` using the strategy named by
    /// `bot.strategy_name` (spec §9 "A strategy registry maps names ->
    /// constructors").
    pub fn start(&self, bot: BotConfig, macro_analyzer: Option<Arc<dyn MacroAnalyzer>>) -> Result<()> {
        if self.bots.contains_key(&bot.bot_id) {
            return Ok(());
        }

        let strategy: Box<dyn Strategy> = self
            .strategies
            .create(&bot.strategy_name)
            .ok_or_else(|| EngineError::Config(format!("no strategy registered for '{}'", bot.strategy_name)))?;

        let bot_id = bot.bot_id;
        self.auth_failures.remove(&bot_id);
        let reconciliation_bot = bot.clone();
        let shutdown = Arc::new(ShutdownManager::new());
        let runner = Arc::new(BotRunner::new(
            bot,
            self.exchange.clone(),
            self.account_cache.clone(),
            self.allocator.clone(),
            self.position_protector.clone(),
            self.orphan_reaper.clone(),
            strategy,
            macro_analyzer,
            self.maintenance.clone(),
            self.engine_config.clone(),
            Some(self.auth_failure_tx.clone()),
        ));

        let task_runner = runner.clone();
        let task_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            task_runner.run(task_shutdown).await;
        });

        let reconciliation_task = spawn_reconciliation_task(self.orphan_reaper.clone(), reconciliation_bot, ReconciliationConfig::default());

        self.bots.insert(
            bot_id,
            BotHandle {
                runner,
                task,
                reconciliation_task,
                shutdown,
                restarting: Arc::new(AtomicBool::new(false)),
            },
        );
        info!("[BotSupervisor] started bot {}", bot_id);
        Ok(())
    }

    /// Signals the bot's runner to stop after its current tick finishes,
    /// then awaits the task (spec §4.7 "the current tick is allowed to
    /// finish, then the runner is torn down").
    pub async fn stop(&self, bot_id: BotId) -> Result<()> {
        let Some((_, handle)) = self.bots.remove(&bot_id) else {
            return Ok(());
        };
        handle.reconciliation_task.abort();
        handle.runner.set_status(BotStatus::Stopped).await;
        handle.shutdown.flag().store(false, Ordering::Release);
        if let Err(err) = handle.task.await {
            warn!("[BotSupervisor] bot {} task join failed: {}", bot_id, err);
        }
        info!("[BotSupervisor] stopped bot {}", bot_id);
        Ok(())
    }

    /// Graceful restart: signal shutdown, await the current task, then
    /// re-spawn with the same bot config (spec §4.7 "Restart is graceful").
    pub async fn restart(&self, bot_id: BotId, macro_analyzer: Option<Arc<dyn MacroAnalyzer>>) -> Result<()> {
        let Some(entry) = self.bots.get(&bot_id) else {
            return Ok(());
        };
        let restarting_flag = entry.restarting.clone();
        drop(entry);

        restarting_flag.store(true, Ordering::Release);

        let bot_config = {
            let Some(entry) = self.bots.get(&bot_id) else {
                restarting_flag.store(false, Ordering::Release);
                return Ok(());
            };
            entry.runner.bot_config().await
        };

        self.stop(bot_id).await?;
        let result = self.start(bot_config, macro_analyzer);
        restarting_flag.store(false, Ordering::Release);
        result
    }

    pub fn is_restarting(&self, bot_id: BotId) -> bool {
        self.bots
            .get(&bot_id)
            .map(|entry| entry.restarting.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// `force_sync` control surface: equivalent to `ensureProtection` +
    /// `OrphanReaper` for one bot, run out-of-band from its regular
    /// schedule (spec §6).
    pub async fn force_sync(&self, bot_id: BotId) -> Result<()> {
        let Some(entry) = self.bots.get(&bot_id) else {
            return Err(EngineError::MarketNotFound(format!("bot {} not running", bot_id)));
        };
        entry.runner.force_sync().await
    }

    pub async fn status(&self, bot_id: BotId) -> Option<BotStatusView> {
        let entry = self.bots.get(&bot_id)?;
        Some(BotStatusView {
            bot_id,
            status: entry.runner.status().await,
            next_validation_at: entry.runner.next_validation_at().await,
            is_restarting: entry.restarting.load(Ordering::Acquire),
        })
    }

    pub fn running_bot_ids(&self) -> Vec<BotId> {
        self.bots.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::strategy::NoopStrategy;
    use crate::testing::mock_exchange::MockExchangeClient;
    use crate::testing::sample_bot_config;

    fn supervisor_with_noop() -> BotSupervisor {
        let mock: Arc<dyn ExchangeClient> = Arc::new(MockExchangeClient::new());
        let mut registry = StrategyRegistry::new();
        registry.register("test-strategy", || Box::new(NoopStrategy));
        BotSupervisor::new(mock, EngineConfig::default(), registry)
    }

    #[tokio::test]
    async fn start_then_stop_round_trips_cleanly() {
        let supervisor = supervisor_with_noop();
        let bot = sample_bot_config();
        let bot_id = bot.bot_id;

        supervisor.start(bot, None).unwrap();
        assert!(supervisor.status(bot_id).await.is_some());

        supervisor.stop(bot_id).await.unwrap();
        assert!(supervisor.status(bot_id).await.is_none());
    }

    #[tokio::test]
    async fn starting_an_unknown_strategy_errors() {
        let supervisor = supervisor_with_noop();
        let mut bot = sample_bot_config();
        bot.strategy_name = "does-not-exist".to_string();

        let result = supervisor.start(bot, None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn starting_the_same_bot_twice_is_idempotent() {
        let supervisor = supervisor_with_noop();
        let bot = sample_bot_config();
        let bot_id = bot.bot_id;

        supervisor.start(bot.clone(), None).unwrap();
        supervisor.start(bot, None).unwrap();

        assert_eq!(supervisor.running_bot_ids().len(), 1);
        supervisor.stop(bot_id).await.unwrap();
    }

    #[tokio::test]
    async fn maintenance_flag_is_visible_to_callers() {
        let supervisor = supervisor_with_noop();
        assert!(!supervisor.is_maintenance());
        supervisor.set_maintenance(true);
        assert!(supervisor.is_maintenance());
    }

    #[tokio::test]
    async fn force_sync_on_unknown_bot_errors() {
        let supervisor = supervisor_with_noop();
        let result = supervisor.force_sync(BotId(999)).await;
        assert!(result.is_err());
    }
}
