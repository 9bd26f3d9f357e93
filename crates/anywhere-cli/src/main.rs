//! Anywhere CLI - moves cluster artifacts between registries and disk archives.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands, CopyCommands, DownloadCommands, ImportCommands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Copy {
            command: CopyCommands::Packages(args),
        } => commands::copy::execute(args).await,
        Commands::Download {
            command: DownloadCommands::Images(args),
        } => commands::download::execute(args).await,
        Commands::Import {
            command: ImportCommands::Images(args),
        } => commands::import::execute(args).await,
        Commands::Version => {
            println!("anywhere {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
