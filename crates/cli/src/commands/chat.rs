//! `concierge chat`: Interactive or single-message chat through the relay.

use std::io::Write;
use std::path::Path;

use concierge_agent::RelayOrchestrator;
use concierge_channels::CliChannel;
use concierge_channels::cli::render_reply;
use concierge_core::channel::{Channel, OutboundReply};

use super::{CmdResult, build_provider, load_config, self_exe};

const CHAT_ID: &str = "cli_session";

pub async fn run(config_path: Option<&Path>, message: Option<String>) -> CmdResult {
    let config = load_config(config_path)?;
    let provider = build_provider(&config)?;
    let relay = RelayOrchestrator::from_config(&config, provider, &self_exe()?);

    if let Some(msg) = message {
        let reply = relay.respond(CHAT_ID, &msg, None).await;
        let reply = OutboundReply::from_generated(reply, usize::MAX, "");
        println!("{}", render_reply(&reply));
        return Ok(());
    }

    println!();
    println!("  Concierge - Interactive Mode");
    println!();
    println!("  Model:     {}", config.model);
    println!(
        "  Servers:   {}",
        relay
            .dispatcher()
            .descriptors()
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Commands:  !img <prompt> for images, 'exit' to quit");
    println!();

    let channel = CliChannel::new();
    let mut rx = channel.start().await.map_err(|e| format!("Channel error: {e}"))?;

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(result) = rx.recv().await {
        match result {
            Ok(event) => {
                if let Err(e) = relay.handle_event(&channel, event).await {
                    eprintln!("  [Error] {e}");
                }
                println!();
                print!("  You > ");
                std::io::stdout().flush()?;
            }
            Err(e) => {
                eprintln!("  [Channel Error] {e}");
                break;
            }
        }
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}
