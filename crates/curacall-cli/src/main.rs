use std::path::Path;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use curacall_config::{AppConfig, ConfigLoader};
use curacall_db::ConversationStore;
use curacall_gateway::{AppState, GatewayServer};

#[derive(Parser)]
#[command(name = "curacall", version, about = "CuraCall voice/chat assistant gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (the default).
    Serve,
    /// Print the effective configuration and exit.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Config => {
            let mut printable = config.clone();
            if printable.openrouter.api_key.is_some() {
                printable.openrouter.api_key = Some("***".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&printable)?);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let store = match config.db_path.as_deref() {
        Some(":memory:") => ConversationStore::in_memory()?,
        Some(path) => ConversationStore::open(Path::new(path))?,
        None => ConversationStore::open(Path::new("curacall.db"))?,
    };

    if config.openrouter.api_key.is_none() {
        info!("OPENROUTER_API_KEY not set; cloud models will answer with a fallback");
    }

    let state = AppState::new(config, store);
    GatewayServer::new(state).serve().await?;
    Ok(())
}
