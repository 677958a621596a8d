//! AccountCache (C2)
//!
//! One source of truth for `AccountSnapshot` per `(strategy, apiKey)` key
//! ("botKey"). Protects the exchange's private endpoints against per-account
//! rate limits via single-flight coalescing and a global minimum inter-call
//! interval (spec §4.1).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::domain::{AccountSnapshot, BotConfig, BotKey, Market, MarketType, OrderBookState};
use crate::error::{EngineError, ExchangeError};
use crate::infrastructure::exchange_client::ExchangeClient;

struct CacheEntry {
    snapshot: Arc<AccountSnapshot>,
    fetched_at: Instant,
}

/// Log-dedup bookkeeping: at most one log line per (botKey, error kind)
/// per `log_dedup_window` (spec §4.1 "Refresh errors are log-deduplicated").
struct LogDedup {
    last_logged: RwLock<HashMap<(BotKey, &'static str), Instant>>,
}

impl LogDedup {
    fn new() -> Self {
        Self {
            last_logged: RwLock::new(HashMap::new()),
        }
    }

    /// No entry means "never logged" - modeled as absence from the map
    /// rather than a backdated `Instant`, since subtracting a window from
    /// `Instant::now()` can underflow on a host whose monotonic clock is
    /// younger than the window (e.g. just booted).
    async fn should_log(&self, key: &BotKey, kind: &'static str, window: Duration) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.write().await;
        match map.get_mut(&(key.clone(), kind)) {
            Some(last) if now.duration_since(*last) < window => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                map.insert((key.clone(), kind), now);
                true
            }
        }
    }
}

/// Single-flight, TTL-cached, globally rate-limited gateway in front of the
/// exchange private API, shared by every bot (spec §4.1).
pub struct AccountCache {
    exchange: Arc<dyn ExchangeClient>,
    config: EngineConfig,
    entries: DashMap<BotKey, CacheEntry>,
    /// Per-key single-flight guard: the `Mutex` content is irrelevant, only
    /// its contention matters, mirroring the reference codebase's pattern of
    /// "one lock per thing that must be exclusive".
    in_flight: DashMap<BotKey, Arc<Mutex<()>>>,
    /// `None` until the first API call - avoids backdating to a sentinel
    /// `Instant` far enough in the past to always clear the gate, which
    /// underflows on a host whose monotonic clock is younger than that.
    last_api_call: Arc<Mutex<Option<Instant>>>,
    log_dedup: LogDedup,
}

impl AccountCache {
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: EngineConfig) -> Self {
        Self {
            exchange,
            config,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            last_api_call: Arc::new(Mutex::new(None)),
            log_dedup: LogDedup::new(),
        }
    }

    /// `get(config) -> AccountSnapshot | error` - returns a snapshot no older
    /// than `round_cache_duration` (spec §4.1 step 1-5).
    pub async fn get(&self, bot: &BotConfig) -> Result<Arc<AccountSnapshot>, EngineError> {
        let key = bot.botkey();

        if let Some(fresh) = self.fresh_entry(&key) {
            return Ok(fresh);
        }

        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have completed the refresh while we waited for
        // the in-flight lock (spec §4.1 step 2 "await that single in-flight
        // task"). Re-check before fetching again.
        if let Some(fresh) = self.fresh_entry(&key) {
            return Ok(fresh);
        }

        match self.refresh(bot, &key).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => self.fallback_or_err(&key, err).await,
        }
    }

    /// `forceRefresh(config)` - evicts the entry; next `get` refetches
    /// (spec §4.1).
    pub async fn force_refresh(&self, bot: &BotConfig) -> Result<Arc<AccountSnapshot>, EngineError> {
        self.invalidate(&bot.botkey());
        self.get(bot).await
    }

    /// `invalidate(botKey)` - evicts the entry addressed by key (spec §4.1).
    pub fn invalidate(&self, key: &BotKey) {
        self.entries.remove(key);
    }

    fn fresh_entry(&self, key: &BotKey) -> Option<Arc<AccountSnapshot>> {
        self.entries.get(key).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.config.round_cache_duration() {
                Some(entry.snapshot.clone())
            } else {
                None
            }
        })
    }

    fn stale_entry_within_extended_limit(&self, key: &BotKey) -> Option<Arc<AccountSnapshot>> {
        self.entries.get(key).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.config.extended_cache_limit() {
                Some(entry.snapshot.clone())
            } else {
                None
            }
        })
    }

    async fn enforce_rate_limit(&self) {
        let mut last_call = self.last_api_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            let min_interval = self.config.min_call_interval();
            if elapsed < min_interval {
                let remaining = min_interval - elapsed;
                debug!("[AccountCache] sleeping {:?} to respect min call interval", remaining);
                // Sleep while holding no other lock besides this one - matches
                // the reference codebase's "sleep while holding no other locks"
                // pattern for its rate-limit gate.
                tokio::time::sleep(remaining).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    async fn refresh(&self, bot: &BotConfig, key: &BotKey) -> Result<Arc<AccountSnapshot>, ExchangeError> {
        self.enforce_rate_limit().await;

        let account = self.exchange.get_account(&bot.api_key, &bot.api_secret).await?;
        // Fetched for parity with spec §4.1's refresh sequence; the snapshot
        // derives realCapital/capitalAvailable from `net_equity_available`
        // alone, so the collateral payload itself is intentionally unused.
        let _collateral = self.exchange.get_collateral(&bot.api_key, &bot.api_secret).await?;
        let markets = self.exchange.get_markets().await?;

        let markets = filter_markets(markets, bot);

        let snapshot = Arc::new(AccountSnapshot::new(
            account.net_equity_available,
            account.leverage,
            account.maker_fee,
            markets,
        ));

        self.entries.insert(
            key.clone(),
            CacheEntry {
                snapshot: snapshot.clone(),
                fetched_at: Instant::now(),
            },
        );
        self.in_flight.remove(key);

        Ok(snapshot)
    }

    /// On refresh failure, fall back to the previous cached snapshot provided
    /// it is younger than `extended_cache_limit`; otherwise surface the error
    /// (spec §4.1 "Failure semantics").
    async fn fallback_or_err(&self, key: &BotKey, err: ExchangeError) -> Result<Arc<AccountSnapshot>, EngineError> {
        self.in_flight.remove(key);

        if let Some(stale) = self.stale_entry_within_extended_limit(key) {
            if self.log_dedup.should_log(key, err.kind_name(), self.config.log_dedup_window()).await {
                warn!(
                    "[AccountCache] refresh failed ({}), falling back to stale snapshot: {}",
                    err.kind_name(),
                    err
                );
            }
            return Ok(stale);
        }

        Err(EngineError::Exchange(err))
    }
}

/// Filter markets to `marketType = PERP AND orderBookState = Open`
/// intersected with `authorizedTokens` if set, clamping `decimalPrice > 6`
/// down to 6 (spec §4.1 step 4).
fn filter_markets(markets: Vec<Market>, bot: &BotConfig) -> HashMap<String, Market> {
    markets
        .into_iter()
        .filter(|m| matches!(m.market_type, MarketType::Perp) && matches!(m.order_book_state, OrderBookState::Open))
        .filter(|m| bot.is_authorized(&m.symbol))
        .map(|mut m| {
            m.decimal_price = m.clamped_decimal_price();
            (m.symbol.clone(), m)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_exchange::MockExchangeClient;
    use crate::testing::sample_bot_config;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn single_flight_collapses_concurrent_refreshes() {
        let mock = Arc::new(MockExchangeClient::new());
        mock.set_account_call_delay(Duration::from_millis(50));
        let cache = Arc::new(AccountCache::new(mock.clone(), EngineConfig::default()));
        let bot = Arc::new(sample_bot_config());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let bot = bot.clone();
            handles.push(tokio::spawn(async move { cache.get(&bot).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(mock.account_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_snapshot_is_served_without_refetching() {
        let mock = Arc::new(MockExchangeClient::new());
        let cache = AccountCache::new(mock.clone(), EngineConfig::default());
        let bot = sample_bot_config();

        cache.get(&bot).await.unwrap();
        cache.get(&bot).await.unwrap();

        assert_eq!(mock.account_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_evicts_and_refetches() {
        let mock = Arc::new(MockExchangeClient::new());
        let cache = AccountCache::new(mock.clone(), EngineConfig::default());
        let bot = sample_bot_config();

        cache.get(&bot).await.unwrap();
        cache.force_refresh(&bot).await.unwrap();

        assert_eq!(mock.account_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limit_failure_falls_back_to_stale_snapshot() {
        let mock = Arc::new(MockExchangeClient::new());
        let mut config = EngineConfig::default();
        config.round_cache_duration_secs = 0;
        let cache = AccountCache::new(mock.clone(), config);
        let bot = sample_bot_config();

        cache.get(&bot).await.unwrap();
        mock.fail_next_account_call(ExchangeError::RateLimited("too many requests".to_string()));

        let snapshot = cache.get(&bot).await.unwrap();
        assert!(snapshot.net_equity_available > 0.0);
    }

    #[tokio::test]
    async fn markets_are_filtered_to_authorized_perp_open() {
        let mock = Arc::new(MockExchangeClient::new());
        let cache = AccountCache::new(mock.clone(), EngineConfig::default());
        let mut bot = sample_bot_config();
        bot.authorized_tokens.insert("BTC_USDC_PERP".to_string());

        let snapshot = cache.get(&bot).await.unwrap();
        assert!(snapshot.markets.contains_key("BTC_USDC_PERP"));
        assert!(!snapshot.markets.contains_key("ETH_USDC_PERP"));
    }
}
