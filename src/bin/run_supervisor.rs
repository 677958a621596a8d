use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use engine::application::{BotSupervisor, NoopStrategy, StrategyRegistry};
use engine::infrastructure::ExchangeClient;
use engine::testing::mock_exchange::MockExchangeClient;
use engine::util::{Heartbeat, ShutdownManager};
use perp_bot_engine::bin_common::{load_bot_configs, load_config_from_env, load_engine_config, init_logging, ConfigType};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    dotenv::dotenv().ok();

    let engine_config_path = load_config_from_env(ConfigType::Engine);
    let engine_config = load_engine_config(&engine_config_path)?;

    let bots_config_path = load_config_from_env(ConfigType::Bots);
    let bots = load_bot_configs(&bots_config_path)?;

    // The real exchange SDK integration is out of scope; `MockExchangeClient`
    // is a deterministic in-memory stand-in so this binary actually runs.
    let exchange: Arc<dyn ExchangeClient> = Arc::new(MockExchangeClient::new());

    let mut strategies = StrategyRegistry::new();
    strategies.register("noop", || Box::new(NoopStrategy));

    let supervisor = Arc::new(BotSupervisor::new(exchange, engine_config, strategies));
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.spawn_signal_handler();

    print_banner("perp-bot-engine supervisor");

    let mut started = 0usize;
    for bot in bots {
        let bot_id = bot.bot_id;
        match supervisor.start(bot, None) {
            Ok(()) => {
                started += 1;
                info!("[run_supervisor] started bot {}", bot_id);
            }
            Err(err) => warn!("[run_supervisor] failed to start bot {}: {}", bot_id, err),
        }
    }

    let mut heartbeat = Heartbeat::new(300);
    while shutdown.is_running() {
        if heartbeat.should_beat() {
            info!(
                "[run_supervisor] heartbeat: {} bots running, maintenance={}",
                supervisor.running_bot_ids().len(),
                supervisor.is_maintenance()
            );
            heartbeat.beat();
        }
        shutdown.interruptible_sleep(Duration::from_secs(5)).await;
    }

    for bot_id in supervisor.running_bot_ids() {
        if let Err(err) = supervisor.stop(bot_id).await {
            warn!("[run_supervisor] error stopping bot {}: {}", bot_id, err);
        }
    }

    print_shutdown("perp-bot-engine supervisor", Some(&format!("{} bot(s) started this run", started)));
    Ok(())
}

fn print_banner(name: &str) {
    info!("");
    info!("========================================");
    info!("Starting {}", name);
    info!("Press Ctrl+C to stop");
    info!("========================================");
    info!("");
}

fn print_shutdown(name: &str, stats: Option<&str>) {
    info!("");
    info!("========================================");
    info!("{} stopped gracefully", name);
    if let Some(stats) = stats {
        info!("{}", stats);
    }
    info!("========================================");
}
