//! BotRunner (C7)
//!
//! Drives one bot's analysis cycle: account refresh, dataset building,
//! strategy invocation, sequential entry submission, protection, and orphan
//! cleanup (spec §4.6). Implements `Revalidator` and `ProtectionTrigger` so
//! the entry state machine (`order_ops::entry`) can call back into account
//! and protection state without depending on `BotRunner` directly - the same
//! cycle-breaking technique the reference codebase uses for its
//! facade/websocket-handler split.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::application::strategy::{MacroAnalyzer, MacroTrend, Strategy, SymbolDataset};
use crate::config::EngineConfig;
use crate::domain::{BotConfig, BotId, BotStatus, ExecutionMode};
use crate::error::{EngineError, ExchangeError, Result};
use crate::infrastructure::order_ops::{open_entry, EntryOutcome, ProtectionTrigger, Revalidator};
use crate::infrastructure::{AccountCache, ExchangeClient, OrderIdAllocator, OrphanReaper, PositionProtector};
use crate::util::{timeframe, ShutdownManager};

/// Candles fetched per symbol when building a dataset or revalidating a
/// signal - enough history for a 14-period ATR plus slack (spec §4.6 step 6).
const KLINE_LOOKBACK: usize = 50;

/// The per-bot scheduler loop that composes `AccountCache`, a `Strategy`,
/// `OrderOps`, `PositionProtector` and `OrphanReaper` (spec §4.6).
pub struct BotRunner {
    bot_id: BotId,
    bot: RwLock<BotConfig>,
    exchange: Arc<dyn ExchangeClient>,
    account_cache: Arc<AccountCache>,
    allocator: Arc<OrderIdAllocator>,
    position_protector: Arc<PositionProtector>,
    orphan_reaper: Arc<OrphanReaper>,
    strategy: Box<dyn Strategy>,
    macro_analyzer: Option<Arc<dyn MacroAnalyzer>>,
    maintenance: Arc<AtomicBool>,
    engine_config: EngineConfig,
    /// Notifies the supervisor when an `Auth` error stops this bot outright
    /// (spec §7 "the one kind that is allowed to end a tick early").
    auth_failure_tx: Option<mpsc::UnboundedSender<BotId>>,
    /// Writes `nextValidationAt` back to whatever store persists `BotConfig`
    /// rows (SPEC_FULL §4.6): the engine owns computing the value, not where
    /// it lives, so the persistence backend is injected as a callback rather
    /// than the engine depending on one directly.
    persist_next_validation_at: Option<Arc<dyn Fn(BotId, DateTime<Utc>) + Send + Sync>>,
}

impl BotRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot: BotConfig,
        exchange: Arc<dyn ExchangeClient>,
        account_cache: Arc<AccountCache>,
        allocator: Arc<OrderIdAllocator>,
        position_protector: Arc<PositionProtector>,
        orphan_reaper: Arc<OrphanReaper>,
        strategy: Box<dyn Strategy>,
        macro_analyzer: Option<Arc<dyn MacroAnalyzer>>,
        maintenance: Arc<AtomicBool>,
        engine_config: EngineConfig,
        auth_failure_tx: Option<mpsc::UnboundedSender<BotId>>,
    ) -> Self {
        Self::with_persistence(
            bot,
            exchange,
            account_cache,
            allocator,
            position_protector,
            orphan_reaper,
            strategy,
            macro_analyzer,
            maintenance,
            engine_config,
            auth_failure_tx,
            None,
        )
    }

    /// Same as [`BotRunner::new`], additionally wiring a callback that
    /// persists `nextValidationAt` every time this runner recomputes it
    /// (SPEC_FULL §4.6). `run_supervisor`/`force_sync` have no persistence
    /// backend to call (spec §1 "config persistence backend" is out of
    /// scope), so they use [`BotRunner::new`]; an integrator with a real
    /// `BotConfig` store wires it in here instead.
    #[allow(clippy::too_many_arguments)]
    pub fn with_persistence(
        bot: BotConfig,
        exchange: Arc<dyn ExchangeClient>,
        account_cache: Arc<AccountCache>,
        allocator: Arc<OrderIdAllocator>,
        position_protector: Arc<PositionProtector>,
        orphan_reaper: Arc<OrphanReaper>,
        strategy: Box<dyn Strategy>,
        macro_analyzer: Option<Arc<dyn MacroAnalyzer>>,
        maintenance: Arc<AtomicBool>,
        engine_config: EngineConfig,
        auth_failure_tx: Option<mpsc::UnboundedSender<BotId>>,
        persist_next_validation_at: Option<Arc<dyn Fn(BotId, DateTime<Utc>) + Send + Sync>>,
    ) -> Self {
        Self {
            bot_id: bot.bot_id,
            bot: RwLock::new(bot),
            exchange,
            account_cache,
            allocator,
            position_protector,
            orphan_reaper,
            strategy,
            macro_analyzer,
            maintenance,
            engine_config,
            auth_failure_tx,
            persist_next_validation_at,
        }
    }

    pub fn bot_id(&self) -> BotId {
        self.bot_id
    }

    pub async fn status(&self) -> BotStatus {
        self.bot.read().await.status
    }

    pub async fn set_status(&self, status: BotStatus) {
        self.bot.write().await.status = status;
    }

    pub async fn next_validation_at(&self) -> DateTime<Utc> {
        self.bot.read().await.next_validation_at
    }

    pub async fn bot_config(&self) -> BotConfig {
        self.bot.read().await.clone()
    }

    /// Runs ticks until `shutdown` flips to not-running. Computes and
    /// persists `nextValidationAt` before each tick, then sleeps only the
    /// remainder of the period after the tick completes - an overrun tick
    /// is followed immediately by the next one rather than a burst of
    /// catch-up ticks (spec §4.6 "no catch-up storms").
    pub async fn run(&self, shutdown: Arc<ShutdownManager>) {
        while shutdown.is_running() {
            let now = Utc::now();
            let bot_snapshot = self.bot.read().await.clone();
            let target = Self::compute_target(
                now,
                &bot_snapshot,
                Duration::from_secs(self.engine_config.default_realtime_period_secs),
                self.engine_config.post_fill_settle_delay(),
            );

            {
                let mut bot = self.bot.write().await;
                bot.next_validation_at = target;
            }
            if let Some(persist) = &self.persist_next_validation_at {
                persist(self.bot_id, target);
            }

            if let Err(err) = self.tick().await {
                warn!("[BotRunner] bot {} tick failed: {}", self.bot_id, err);
                if matches!(err, EngineError::Exchange(ExchangeError::Auth(_))) {
                    self.stop_on_auth_failure().await;
                }
            }

            let remaining = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            shutdown.interruptible_sleep(remaining).await;
        }
    }

    /// Stops the bot in place and tells the supervisor it needs attention
    /// (spec §7: an `Auth` error ends the tick early and the bot is stopped
    /// rather than retried on the next schedule).
    async fn stop_on_auth_failure(&self) {
        warn!("[BotRunner] bot {} stopped after an authentication error, needs manual restart", self.bot_id);
        self.set_status(BotStatus::Stopped).await;
        if let Some(tx) = &self.auth_failure_tx {
            let _ = tx.send(self.bot_id);
        }
    }

    fn compute_target(now: DateTime<Utc>, bot: &BotConfig, default_realtime_period: Duration, settle_delay: Duration) -> DateTime<Utc> {
        match bot.execution_mode {
            ExecutionMode::Realtime => now + chrono::Duration::from_std(default_realtime_period).unwrap_or(chrono::Duration::seconds(60)),
            ExecutionMode::OnCandleClose => {
                let period = timeframe::parse(&bot.time).unwrap_or(default_realtime_period);
                let boundary = timeframe::next_boundary(now, period);
                boundary + chrono::Duration::from_std(settle_delay).unwrap_or(chrono::Duration::seconds(0))
            }
        }
    }

    /// One analysis cycle (spec §4.6 "Tick procedure" steps 1-10).
    pub async fn tick(&self) -> Result<()> {
        let bot = self.bot.read().await.clone();

        if self.maintenance.load(Ordering::Acquire) || bot.status == BotStatus::Stopped {
            debug!("[BotRunner] bot {} skipped (maintenance or stopped)", self.bot_id);
            return Ok(());
        }

        let snapshot = self.account_cache.get(&bot).await?;

        let positions = self.exchange.get_open_positions(&bot.api_key, &bot.api_secret).await?;
        let open_orders = self.exchange.get_open_orders(None, &bot.api_key, &bot.api_secret).await?;

        let mut blocked_symbols: HashSet<String> = positions.iter().filter(|p| !p.is_flat()).map(|p| p.symbol.clone()).collect();
        blocked_symbols.extend(
            open_orders
                .iter()
                .filter(|o| o.belongs_to(&bot) && o.status.is_live() && !o.reduce_only)
                .map(|o| o.symbol.clone()),
        );

        let macro_trend = self.analyze_macro_trend(&bot).await;

        let datasets = self.build_datasets(&bot, &snapshot, &blocked_symbols).await;

        let mut intents = self.strategy.analyze(&datasets, &bot, macro_trend.as_ref()).await?;
        intents.sort_by(|a, b| b.expected_pnl.partial_cmp(&a.expected_pnl).unwrap_or(std::cmp::Ordering::Equal));

        for intent in &intents {
            let live_bot = self.bot.read().await.clone();
            if live_bot.status == BotStatus::Stopped || self.maintenance.load(Ordering::Acquire) {
                debug!("[BotRunner] bot {} stopping entry submission mid-tick", self.bot_id);
                break;
            }

            let open_count = self
                .exchange
                .get_open_positions(&live_bot.api_key, &live_bot.api_secret)
                .await?
                .iter()
                .filter(|p| !p.is_flat())
                .count();
            if open_count >= live_bot.max_open_orders {
                debug!("[BotRunner] bot {} at max_open_orders ({}), stopping entry submission", self.bot_id, live_bot.max_open_orders);
                break;
            }

            match open_entry(
                intent,
                &live_bot,
                &snapshot,
                &self.exchange,
                &self.allocator,
                Some(self),
                Some(self),
                self.engine_config.post_fill_settle_delay(),
                self.engine_config.default_order_execution_timeout(),
            )
            .await
            {
                Ok(EntryOutcome::Filled(filled)) => {
                    info!(
                        "[BotRunner] bot {} {} entry filled ({:?}, price={:.6})",
                        self.bot_id, intent.symbol, filled.order_type, filled.exec_price
                    );
                }
                Ok(EntryOutcome::Aborted(reason)) => {
                    debug!("[BotRunner] bot {} {} entry aborted: {}", self.bot_id, intent.symbol, reason);
                }
                Err(err) => {
                    warn!("[BotRunner] bot {} {} entry failed: {}", self.bot_id, intent.symbol, err);
                }
            }
        }

        let protection_futures = positions.iter().filter(|p| !p.is_flat()).filter_map(|position| {
            let market = snapshot.market(&position.symbol)?;
            Some(async move {
                if let Err(err) = self.position_protector.ensure_protection(&bot, market, position).await {
                    warn!("[BotRunner] bot {} {} ensure_protection failed: {}", self.bot_id, position.symbol, err);
                }
            })
        });
        // Parallel across symbols; each `ensure_protection` call is
        // internally serialized per symbol by `PositionProtector`'s own
        // lock set (spec §5 "parallel across symbols, serialized per
        // symbol").
        futures::future::join_all(protection_futures).await;

        if bot.enable_orphan_order_monitor {
            if let Err(err) = self.orphan_reaper.reap(&bot).await {
                warn!("[BotRunner] bot {} orphan reap failed: {}", self.bot_id, err);
            }
        }

        Ok(())
    }

    /// `force_sync` control-surface contract: "equivalent to
    /// `PositionProtector.ensureProtection` + `OrphanReaper` for that bot"
    /// (spec §6).
    pub async fn force_sync(&self) -> Result<()> {
        let bot = self.bot.read().await.clone();
        let snapshot = self.account_cache.force_refresh(&bot).await?;
        let positions = self.exchange.get_open_positions(&bot.api_key, &bot.api_secret).await?;
        for position in positions.iter().filter(|p| !p.is_flat()) {
            if let Some(market) = snapshot.market(&position.symbol) {
                self.position_protector.ensure_protection(&bot, market, position).await?;
            }
        }
        self.orphan_reaper.reap(&bot).await?;
        Ok(())
    }

    async fn analyze_macro_trend(&self, bot: &BotConfig) -> Option<MacroTrend> {
        let analyzer = self.macro_analyzer.as_ref()?;
        match analyzer.analyze(&bot.time).await {
            Ok(trend) => Some(trend),
            Err(err) => {
                warn!("[BotRunner] bot {} macro trend analysis failed: {}", self.bot_id, err);
                None
            }
        }
    }

    /// Builds datasets for `authorized ∩ ¬blocked`, capped at
    /// `maxTokensPerBot` (spec §4.6 step 6). Symbols whose candle or
    /// mark-price fetch fails are skipped for this tick rather than failing
    /// the whole cycle (spec §7 "a tick that fails to protect/build one
    /// symbol still runs the next").
    async fn build_datasets(
        &self,
        bot: &BotConfig,
        snapshot: &crate::domain::AccountSnapshot,
        blocked_symbols: &HashSet<String>,
    ) -> Vec<SymbolDataset> {
        let candidate_symbols: Vec<String> = snapshot
            .markets
            .keys()
            .filter(|symbol| bot.is_authorized(symbol) && !blocked_symbols.contains(*symbol))
            .take(self.engine_config.max_tokens_per_bot)
            .cloned()
            .collect();

        let mut datasets = Vec::with_capacity(candidate_symbols.len());
        for symbol in candidate_symbols {
            let Some(market) = snapshot.market(&symbol).cloned() else {
                continue;
            };
            let candles = match self.exchange.get_klines(&symbol, &bot.time, KLINE_LOOKBACK).await {
                Ok(candles) => candles,
                Err(err) => {
                    warn!("[BotRunner] bot {} {} kline fetch failed: {}", self.bot_id, symbol, err);
                    continue;
                }
            };
            let mark_price = match self.exchange.get_all_mark_prices(Some(std::slice::from_ref(&symbol))).await {
                Ok(prices) => prices.into_iter().find(|(s, _)| *s == symbol).map(|(_, p)| p),
                Err(err) => {
                    warn!("[BotRunner] bot {} {} mark price fetch failed: {}", self.bot_id, symbol, err);
                    None
                }
            };
            let Some(mark_price) = mark_price else {
                continue;
            };
            datasets.push(SymbolDataset { symbol, market, candles, mark_price });
        }
        datasets
    }
}

#[async_trait]
impl Revalidator for BotRunner {
    /// Rebuilds a fresh dataset for the intent's symbol and re-calls the
    /// strategy's `revalidate` hook deterministically (spec §4.3
    /// `CANCEL_AND_REVALIDATE`).
    async fn revalidate(&self, intent: &crate::domain::OrderIntent, bot: &BotConfig) -> Result<Option<crate::domain::OrderIntent>> {
        let snapshot = self.account_cache.get(bot).await?;
        let Some(market) = snapshot.market(&intent.symbol).cloned() else {
            return Ok(None);
        };
        let candles = self.exchange.get_klines(&intent.symbol, &bot.time, KLINE_LOOKBACK).await.unwrap_or_default();
        let mark_price = self
            .exchange
            .get_all_mark_prices(Some(std::slice::from_ref(&intent.symbol)))
            .await
            .ok()
            .and_then(|prices| prices.into_iter().find(|(s, _)| *s == intent.symbol).map(|(_, p)| p))
            .unwrap_or(intent.entry_price);

        let dataset = SymbolDataset { symbol: intent.symbol.clone(), market, candles, mark_price };
        self.strategy.revalidate(intent, &dataset, bot).await
    }
}

#[async_trait]
impl ProtectionTrigger for BotRunner {
    /// Breaks the `PositionProtector` <-> `OrderOps` cycle (spec §9): called
    /// from `POST_FILL` instead of `OrderOps` depending on `PositionProtector`
    /// directly.
    async fn ensure_protection(&self, symbol: &str) {
        let bot = self.bot.read().await.clone();
        let snapshot = match self.account_cache.get(&bot).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("[BotRunner] bot {} {} post-fill account fetch failed: {}", self.bot_id, symbol, err);
                return;
            }
        };
        let Some(market) = snapshot.market(symbol) else {
            return;
        };
        let positions = match self.exchange.get_open_positions(&bot.api_key, &bot.api_secret).await {
            Ok(positions) => positions,
            Err(err) => {
                warn!("[BotRunner] bot {} {} post-fill position fetch failed: {}", self.bot_id, symbol, err);
                return;
            }
        };
        let Some(position) = positions.iter().find(|p| p.symbol == symbol) else {
            return;
        };
        if let Err(err) = self.position_protector.ensure_protection(&bot, market, position).await {
            warn!("[BotRunner] bot {} {} post-fill ensure_protection failed: {}", self.bot_id, symbol, err);
        }
    }
}
