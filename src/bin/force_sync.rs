//! `force_sync` control-surface tool (spec §6): runs `ensureProtection` +
//! `OrphanReaper` for one bot out-of-band from its regular schedule, then
//! exits. Does not touch the bot's `next_validation_at`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use engine::application::{BotSupervisor, NoopStrategy, StrategyRegistry};
use engine::domain::BotId;
use engine::infrastructure::ExchangeClient;
use engine::testing::mock_exchange::MockExchangeClient;
use perp_bot_engine::bin_common::{init_logging, load_bot_configs, load_config_from_env, load_engine_config, parse_args, ConfigType};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    dotenv::dotenv().ok();

    let args = parse_args();
    let Some(bot_id_arg) = args.first() else {
        bail!("usage: force_sync <bot_id>");
    };
    let bot_id = BotId(bot_id_arg.parse::<i64>().context("bot_id must be an integer")?);

    let engine_config = load_engine_config(load_config_from_env(ConfigType::Engine))?;
    let bots = load_bot_configs(load_config_from_env(ConfigType::Bots))?;
    let Some(bot) = bots.into_iter().find(|b| b.bot_id == bot_id) else {
        bail!("no bot with id {} in the bot roster", bot_id);
    };

    let exchange: Arc<dyn ExchangeClient> = Arc::new(MockExchangeClient::new());
    let mut strategies = StrategyRegistry::new();
    strategies.register("noop", || Box::new(NoopStrategy));

    let supervisor = BotSupervisor::new(exchange, engine_config, strategies);
    supervisor.start(bot, None)?;

    info!("[force_sync] forcing sync for bot {}", bot_id);
    supervisor.force_sync(bot_id).await?;

    supervisor.stop(bot_id).await?;
    info!("[force_sync] done");
    Ok(())
}
