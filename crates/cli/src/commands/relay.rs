//! `concierge relay`: Run the Discord relay.
//!
//! Connects to the Discord gateway, answers every message that mentions the
//! bot, and delivers replies over the REST API. Every accepted message is
//! handled in its own task.

use std::path::Path;
use std::sync::Arc;

use concierge_agent::RelayOrchestrator;
use concierge_channels::{DiscordChannel, DiscordConfig};
use concierge_core::channel::Channel;
use tracing::{info, warn};

use super::{CmdResult, build_provider, load_config, self_exe};

pub async fn run(config_path: Option<&Path>) -> CmdResult {
    let config = load_config(config_path)?;
    if config.discord.bot_token.is_none() {
        return Err("DISCORD_TOKEN is not set; the relay cannot connect to Discord".into());
    }
    let provider = build_provider(&config)?;
    let relay = Arc::new(RelayOrchestrator::from_config(&config, provider, &self_exe()?));

    let discord = Arc::new(DiscordChannel::new(DiscordConfig::from(&config.discord)));
    let bot_user_id = discord.resolve_bot_user_id().await?;
    let mut inbound = discord.start().await?;
    let gateway = tokio::spawn(Arc::clone(&discord).run_gateway());

    info!(model = %config.model, bot_user_id = %bot_user_id, "Relay running");

    let mut tasks = tokio::task::JoinSet::new();
    loop {
        tokio::select! {
            event = inbound.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Inbound error");
                        continue;
                    }
                };
                let relay = Arc::clone(&relay);
                let discord = Arc::clone(&discord);
                tasks.spawn(async move {
                    if let Err(e) = relay.handle_event(discord.as_ref(), event).await {
                        warn!(error = %e, "Reply delivery failed");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    gateway.abort();
    while tasks.join_next().await.is_some() {}
    discord.stop().await?;
    info!("Relay stopped");

    if let Ok(Err(e)) = gateway.await {
        return Err(e.into());
    }
    Ok(())
}
