//! `concierge img`: Generate an image and write it to a file.

use std::path::Path;

use concierge_agent::{ClientSettings, ConversationalClient};

use super::{CmdResult, build_provider, load_config};

pub async fn run(config_path: Option<&Path>, prompt: &str, output: &Path) -> CmdResult {
    let config = load_config(config_path)?;
    let provider = build_provider(&config)?;
    let client = ConversationalClient::new(provider, ClientSettings::from_config(&config));

    eprint!("  Generating...");
    let reply = client.generate_image(prompt).await;
    eprint!("\r              \r");

    if let Some(text) = reply.text() {
        println!("{text}");
    }
    match reply.image() {
        Some(image) => {
            tokio::fs::write(output, &image.bytes).await?;
            println!("  Saved {} ({} bytes)", output.display(), image.bytes.len());
            Ok(())
        }
        None => Err("No image was generated".into()),
    }
}
