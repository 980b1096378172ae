//! CLI command implementations

use anyhow::Result;
use dialoguer::Confirm;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::consensus::ConsensusEngine;
use crate::engine::{EngineSettings, RotativeEngine};
use crate::exchange::binance::BinanceClient;
use crate::exchange::{MarketData, TradingApi};
use crate::exchange::paper::PaperExchange;
use crate::position::book::{CloseReason, PositionBook};
use crate::position::monitor::{PositionEvent, PositionMonitor};
use crate::risk::RiskManager;
use crate::store::{Journal, CLOSE_PREFIX, CYCLE_PREFIX, EXECUTION_PREFIX};

/// Everything a command needs wired against one venue.
struct Components {
    market: Arc<dyn MarketData>,
    trading: Arc<dyn TradingApi>,
    book: Arc<PositionBook>,
    cycles: Arc<Journal>,
    executions: Arc<Journal>,
    closes: Arc<Journal>,
}

async fn build_components(config: &Config, paper: bool) -> Result<Components> {
    let (market, trading): (Arc<dyn MarketData>, Arc<dyn TradingApi>) = if paper {
        info!(
            "Using paper exchange with {} {} starting balance",
            config.paper.starting_balance, config.exchange.quote_asset
        );
        let venue = Arc::new(PaperExchange::new(config.paper.starting_balance));
        (venue.clone(), venue)
    } else {
        let client = Arc::new(BinanceClient::new(&config.exchange)?);
        client.ping().await?;
        info!("Exchange connectivity OK");
        (client.clone(), client)
    };

    let data_dir = &config.storage.data_dir;
    let cycles = Arc::new(Journal::open(data_dir, CYCLE_PREFIX).await?);
    let executions = Arc::new(Journal::open(data_dir, EXECUTION_PREFIX).await?);
    let closes = Arc::new(Journal::open(data_dir, CLOSE_PREFIX).await?);

    let book = Arc::new(PositionBook::new(Some(format!(
        "{}/positions.json",
        data_dir
    ))));
    if let Err(e) = book.load().await {
        warn!("Could not load positions: {} (starting fresh)", e);
    }

    Ok(Components {
        market,
        trading,
        book,
        cycles,
        executions,
        closes,
    })
}

/// Start the decision engine
pub async fn start(config: &Config, paper: bool) -> Result<()> {
    let paper = paper || config.paper.enabled;
    if paper {
        warn!("Running in PAPER mode - no real orders will be placed");
    }

    info!("Starting decision engine...");
    info!(
        "Watchlist: {:?}, cycle every {}ms",
        config.analysis.watchlist, config.analysis.cycle_interval_ms
    );

    let components = build_components(config, paper).await?;

    let consensus = Arc::new(ConsensusEngine::new(config.consensus.params()));
    let risk = Arc::new(RiskManager::new(config.risk));

    let engine = Arc::new(RotativeEngine::new(
        components.market.clone(),
        components.trading.clone(),
        consensus.clone(),
        risk,
        components.book.clone(),
        components.cycles.clone(),
        components.executions.clone(),
        EngineSettings::from_config(config),
    ));
    engine.start().await?;

    let monitor = PositionMonitor::new(
        components.market,
        components.trading,
        components.book.clone(),
        components.closes,
        config.monitor.clone(),
    );
    let (event_tx, mut event_rx) = mpsc::channel::<PositionEvent>(64);
    monitor.start(event_tx).await?;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    PositionEvent::Closed { position } => {
                        info!(
                            "{} closed: pnl {:.4} ({:.2}%)",
                            position.symbol,
                            position.pnl.unwrap_or(0.0),
                            position.pnl_percent.unwrap_or(0.0)
                        );
                        // A fresh exit keeps the symbol quiet for one
                        // cooldown window.
                        consensus.arm_cooldown(&position.symbol).await;
                    }
                    PositionEvent::CloseFailed { symbol, reason, .. } => {
                        warn!("Close on {} failed, will retry: {}", symbol, reason);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                monitor.stop();
                if let Err(e) = engine.stop() {
                    error!("Engine stop failed: {}", e);
                }
                break;
            }
        }
    }

    Ok(())
}

/// One-shot analysis of a single symbol
pub async fn analyze(config: &Config, symbol: &str) -> Result<()> {
    let symbol = symbol.to_uppercase();
    let components = build_components(config, config.paper.enabled).await?;

    let consensus = Arc::new(ConsensusEngine::new(config.consensus.params()));
    let engine = Arc::new(RotativeEngine::new(
        components.market,
        components.trading,
        consensus,
        Arc::new(RiskManager::new(config.risk)),
        components.book,
        components.cycles,
        components.executions,
        EngineSettings::from_config(config),
    ));

    let (composite, votes) = engine.analyze(&symbol).await?;

    println!("\n=== ANALYSIS: {} ===\n", symbol);
    println!("Price:     {:.8}", composite.price);
    println!(
        "Composite: {} (strength {:.1})",
        composite.direction, composite.strength
    );
    for reason in &composite.reasons {
        println!("  - {}", reason);
    }
    println!("\nStrategy votes:");
    for vote in votes {
        println!(
            "  {:<20} {:<8} strength {:>5.1}  confidence {:.2}",
            vote.strategy_id, vote.direction.to_string(), vote.strength, vote.confidence
        );
    }
    Ok(())
}

/// Show journal counters and open positions
pub async fn status(config: &Config) -> Result<()> {
    let components = build_components(config, true).await?;

    let cycles = components.cycles.meta().await;
    let executions = components.executions.meta().await;
    let closes = components.closes.meta().await;
    let open = components.book.open_positions().await;

    println!("\n=== ENGINE STATUS ===\n");
    println!("Cycles recorded:     {}", cycles.total_count);
    println!("Executions recorded: {}", executions.total_count);
    println!("Closes recorded:     {}", closes.total_count);

    println!("\n=== OPEN POSITIONS ===\n");
    if open.is_empty() {
        println!("No open positions.");
    } else {
        for p in open {
            println!(
                "{} {} {:.8} @ {:.8} (sl {:.8} / tp {:.8}) pnl {:.4}",
                p.symbol,
                p.side,
                p.quantity,
                p.open_price,
                p.stop_loss,
                p.take_profit,
                p.unrealized_pnl()
            );
        }
    }
    Ok(())
}

/// Page through a journal, newest first
pub async fn history(config: &Config, kind: &str, page: usize, size: usize) -> Result<()> {
    let prefix = match kind {
        "cycles" => CYCLE_PREFIX,
        "executions" => EXECUTION_PREFIX,
        "closes" => CLOSE_PREFIX,
        other => anyhow::bail!(
            "Unknown history kind '{}' (expected cycles, executions or closes)",
            other
        ),
    };

    let journal = Journal::open(&config.storage.data_dir, prefix).await?;
    let size = if size == 0 { config.storage.page_size } else { size };
    let records: Vec<serde_json::Value> = journal.page(page, size).await?;

    let meta = journal.meta().await;
    println!(
        "\n=== {} (page {}, {} total) ===\n",
        kind.to_uppercase(),
        page,
        meta.total_count
    );
    if records.is_empty() {
        println!("No records on this page.");
    }
    for record in records {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}

/// List open positions
pub async fn positions(config: &Config) -> Result<()> {
    let components = build_components(config, true).await?;
    let open = components.book.open_positions().await;

    println!("\n=== OPEN POSITIONS ===\n");
    if open.is_empty() {
        println!("No open positions.");
        return Ok(());
    }
    for p in open {
        println!("{}", serde_json::to_string_pretty(&p)?);
    }
    Ok(())
}

/// Manually close all open positions on a symbol
pub async fn close(config: &Config, symbol: &str, force: bool) -> Result<()> {
    let symbol = symbol.to_uppercase();
    let components = build_components(config, config.paper.enabled).await?;

    let open = components.book.open_for_symbol(&symbol).await;
    if open.is_empty() {
        anyhow::bail!("No open position on {}", symbol);
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Close {} position(s) on {}? This cannot be undone.",
                open.len(),
                symbol
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            info!("Close cancelled by user");
            return Ok(());
        }
    }

    for position in open {
        let price = components
            .market
            .get_current_price(&position.symbol)
            .await?;
        let event = PositionMonitor::close_position(
            &*components.trading,
            &components.book,
            &components.closes,
            &position,
            price,
            CloseReason::Manual,
        )
        .await;
        match event {
            PositionEvent::Closed { position } => {
                println!(
                    "Closed {} @ {:.8}: pnl {:.4} ({:.2}%)",
                    position.symbol,
                    price,
                    position.pnl.unwrap_or(0.0),
                    position.pnl_percent.unwrap_or(0.0)
                );
            }
            PositionEvent::CloseFailed { reason, .. } => {
                error!("Close failed: {}", reason);
                anyhow::bail!("Close order failed: {}", reason);
            }
        }
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
