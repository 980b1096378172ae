//! Rotor - automated market-signal decision engine
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Stop-loss triggers are polled, not guaranteed; fast markets can gap
//!   through them.
//! - Backtest success does NOT equal live success.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

// Use the library crate
use rotor_bot::cli::commands;
use rotor_bot::config::Config;

/// Automated market-signal decision engine
#[derive(Parser)]
#[command(name = "rotor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the analysis and execution loop
    Start {
        /// Run against the paper exchange (no real orders)
        #[arg(long)]
        paper: bool,
    },

    /// Analyze a single symbol once and print the verdict
    Analyze {
        /// Market symbol, e.g. BTCUSDT
        symbol: String,
    },

    /// Show journal counters and open positions
    Status,

    /// Page through journaled records, newest first
    History {
        /// Record kind: cycles, executions or closes
        #[arg(default_value = "cycles")]
        kind: String,

        /// Page number (1-based)
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Records per page (0 = configured default)
        #[arg(short, long, default_value = "0")]
        size: usize,
    },

    /// List open positions
    Positions,

    /// Manually close all open positions on a symbol
    Close {
        /// Market symbol, e.g. BTCUSDT
        symbol: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rotor_bot=info".parse().unwrap()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Perform startup checks
    let live_trading = matches!(&cli.command, Commands::Start { paper: false }) && !config.paper.enabled;
    if let Err(e) = startup_checks(&config, live_trading).await {
        error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    // Execute command
    let result = match cli.command {
        Commands::Start { paper } => commands::start(&config, paper).await,
        Commands::Analyze { symbol } => commands::analyze(&config, &symbol).await,
        Commands::Status => commands::status(&config).await,
        Commands::History { kind, page, size } => {
            commands::history(&config, &kind, page, size).await
        }
        Commands::Positions => commands::positions(&config).await,
        Commands::Close { symbol, force } => commands::close(&config, &symbol, force).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Perform startup safety checks
async fn startup_checks(config: &Config, live_trading: bool) -> Result<()> {
    info!("Performing startup checks...");

    // Live trading needs signed endpoints; refuse to start half-configured
    if live_trading {
        if config.exchange.api_key.is_empty() {
            return Err(anyhow::anyhow!(
                "BINANCE_API_KEY not set. Export it or run with --paper."
            ));
        }
        if config.exchange.api_secret.is_empty() {
            return Err(anyhow::anyhow!(
                "BINANCE_API_SECRET not set. Export it or run with --paper."
            ));
        }
    }

    // The data directory must be writable before the first cycle fires
    let data_dir = std::path::Path::new(&config.storage.data_dir);
    std::fs::create_dir_all(data_dir).map_err(|e| {
        anyhow::anyhow!(
            "Cannot create data directory {}: {}",
            config.storage.data_dir,
            e
        )
    })?;
    let probe = data_dir.join(".write-probe");
    std::fs::write(&probe, b"ok")
        .map_err(|e| anyhow::anyhow!("Data directory not writable: {}", e))?;
    let _ = std::fs::remove_file(&probe);

    warn!(
        "Risk limits active: position={}%, daily_loss={}%, drawdown={}%",
        config.risk.max_position_size_percent,
        config.risk.max_daily_loss_percent,
        config.risk.max_drawdown_percent
    );

    info!("Startup checks passed");
    Ok(())
}
