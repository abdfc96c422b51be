//! Concierge CLI: the main entry point.
//!
//! Commands:
//! - `chat`       : Interactive terminal chat through the relay
//! - `relay`      : Run the Discord relay
//! - `tool-server`: Serve the search or Discord metadata tools over stdio
//! - `tools`      : List the catalog of every configured tool server
//! - `classify`   : Show how an utterance would be routed
//! - `img`        : Generate an image

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::tool_server::ToolServerKind;

#[derive(Parser)]
#[command(
    name = "concierge",
    about = "Concierge - Discord to Gemini relay with pluggable tool servers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.concierge/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the relay in the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Run the Discord relay over the gateway
    Relay,

    /// Serve a tool server over stdin/stdout
    ToolServer {
        #[arg(value_enum)]
        kind: ToolServerKind,
    },

    /// Open each configured tool server and print its catalog
    Tools,

    /// Print the routing decision for an utterance
    Classify { text: String },

    /// Generate an image from a prompt
    Img {
        prompt: String,

        /// Where to write the image
        #[arg(short, long, default_value = "image.png")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries replies and the tool protocol.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Chat { message } => commands::chat::run(config_path, message).await?,
        Commands::Relay => commands::relay::run(config_path).await?,
        Commands::ToolServer { kind } => commands::tool_server::run(kind).await?,
        Commands::Tools => commands::tools::run(config_path).await?,
        Commands::Classify { text } => commands::classify::run(config_path, &text)?,
        Commands::Img { prompt, output } => commands::img::run(config_path, &prompt, &output).await?,
    }

    Ok(())
}
