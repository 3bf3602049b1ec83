mod admin;
mod output;
mod runtime;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opbot_config::{config_dir, config_file_path, load_and_prepare, OpbotConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "opbot")]
#[command(about = "opbot: chat command dispatcher")]
#[command(version)]
struct Cli {
    /// Config file (default: $OPBOT_CONFIG_DIR/opbot.yaml or ~/.opbot/opbot.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the Slack Events API webhook
    Serve,
    /// Read commands from stdin and print replies
    Console,
    /// Show the effective config (secrets masked) and validate it
    CheckConfig,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List every registered command syntax
    Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .unwrap_or_else(|| config_file_path(&config_dir()));

    match cli.command {
        Commands::Serve => {
            let config = start(&path).await?;
            runtime::serve(&config).await?;
        }
        Commands::Console => {
            let config = start(&path).await?;
            runtime::console(&config).await?;
        }
        Commands::CheckConfig => admin::check_config(&path).await?,
        Commands::Init { force } => admin::init(&path, force).await?,
        Commands::Commands => {
            let config = load_and_prepare(&path).await?;
            print!("{}", admin::list_commands(&config));
        }
    }

    Ok(())
}

/// Load the config and bring up logging for a long-running mode.
async fn start(path: &std::path::Path) -> Result<OpbotConfig> {
    let config = load_and_prepare(path).await?;
    opbot_logging::init_logger(config.log_dir(), config.log_level())?;
    info!(
        config = %path.display(),
        bot = %config.bot_name(),
        persister = %config.persister_kind(),
        "Starting opbot"
    );
    Ok(config)
}
