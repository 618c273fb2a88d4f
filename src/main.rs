//! vvsync - encrypted budget vault
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vvsync::cli::{commands, Cli, Commands};
use vvsync::config::ConfigManager;
use vvsync::error::VaultResult;
use vvsync::ui::{self, UiContext};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> VaultResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let verbosity = cli.verbose.max(u8::from(config.general.verbose));
    let filter = match verbosity {
        0 => EnvFilter::new("vvsync=warn"),
        1 => EnvFilter::new("vvsync=info"),
        _ => EnvFilter::new("vvsync=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
    debug!("Using config {}", config_manager.path().display());

    ui::init_theme();
    let ctx = UiContext::detect().with_json(cli.json);

    match cli.command {
        Commands::Share(args) => commands::share(args, &ctx).await,
        Commands::Identity(args) => commands::identity(args, &config, &ctx).await,
        Commands::Vault(args) => commands::vault(args, &config, &ctx).await,
        Commands::Entry(args) => commands::entry(args, &config, &ctx).await,
        Commands::Sync(args) => commands::sync(args, &config, &ctx).await,
        Commands::Lock(args) => commands::lock(args, &config, &ctx).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager, &ctx).await,
    }
}
