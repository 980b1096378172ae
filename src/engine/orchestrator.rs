//! Rotative analysis engine
//!
//! Walks the watch-list on a fixed cadence: fetch candles, evaluate the
//! strategy roster, feed the consensus window, and execute when every
//! gate clears. Each pass is journaled as one cycle record; a failing
//! symbol is logged into the record and never aborts the pass. A cycle
//! that outlives the tick interval is protected by a guard so passes
//! never overlap.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::analysis::signal::{generate_signal, Signal};
use crate::analysis::strategies::{SignalDirection, StrategyKind, StrategySignal};
use crate::config::Config;
use crate::consensus::{ConsensusEngine, ConsensusOutcome, Recommendation, SignalPublisher};
use crate::engine::status::{CooldownStatus, EngineStatus};
use crate::error::{Error, Result};
use crate::exchange::types::{OrderRequest, OrderSide};
use crate::exchange::{MarketData, TradingApi};
use crate::position::book::{Position, PositionBook};
use crate::risk::{RiskManager, RiskParametersUpdate, TradeProposal};
use crate::store::records::{
    CycleRecord, ExecutionDetails, ExecutionRecord, StopWinLoss, StrategyCell, TableRow,
};
use crate::store::Journal;

/// Runtime settings derived from the analysis and strategy sections of
/// the configuration. Hot-swappable; the next cycle picks changes up.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub watchlist: Vec<String>,
    pub interval: String,
    pub confirmation_interval: Option<String>,
    pub candle_limit: u32,
    pub cycle_interval_ms: u64,
    pub min_signal_strength: f64,
    pub max_open_positions: usize,
    pub max_positions_per_symbol: usize,
    pub strategies: Vec<(StrategyKind, f64)>,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            watchlist: config.analysis.watchlist.clone(),
            interval: config.analysis.interval.clone(),
            confirmation_interval: config.analysis.confirmation_interval.clone(),
            candle_limit: config.analysis.candle_limit,
            cycle_interval_ms: config.analysis.cycle_interval_ms,
            min_signal_strength: config.analysis.min_signal_strength,
            max_open_positions: config.analysis.max_open_positions,
            max_positions_per_symbol: config.analysis.max_positions_per_symbol,
            strategies: config.enabled_strategies(),
        }
    }
}

/// What one symbol contributed to a cycle.
struct SymbolReport {
    row: TableRow,
    signals_generated: u32,
    executed: bool,
    error: Option<String>,
}

pub struct RotativeEngine {
    market: Arc<dyn MarketData>,
    trading: Arc<dyn TradingApi>,
    consensus: Arc<ConsensusEngine>,
    risk: Arc<RiskManager>,
    book: Arc<PositionBook>,
    cycles: Arc<Journal>,
    executions: Arc<Journal>,
    settings: RwLock<EngineSettings>,
    // Held for the duration of one cycle; a tick that finds it set is a
    // no-op and allocates no cycle number.
    cycle_guard: AtomicBool,
    running: AtomicBool,
    cycles_completed: AtomicU64,
    last_cycle: RwLock<Option<CycleRecord>>,
    shutdown: tokio::sync::broadcast::Sender<()>,
}

impl RotativeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Arc<dyn MarketData>,
        trading: Arc<dyn TradingApi>,
        consensus: Arc<ConsensusEngine>,
        risk: Arc<RiskManager>,
        book: Arc<PositionBook>,
        cycles: Arc<Journal>,
        executions: Arc<Journal>,
        settings: EngineSettings,
    ) -> Self {
        let (shutdown, _) = tokio::sync::broadcast::channel(1);
        Self {
            market,
            trading,
            consensus,
            risk,
            book,
            cycles,
            executions,
            settings: RwLock::new(settings),
            cycle_guard: AtomicBool::new(false),
            running: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            last_cycle: RwLock::new(None),
            shutdown,
        }
    }

    /// Start the rotative loop. Fails fast on a configuration that can
    /// never produce a decision.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let settings = self.settings.read().await.clone();
        if settings.watchlist.is_empty() {
            return Err(Error::Config("watchlist is empty".to_string()));
        }
        if settings.strategies.is_empty() {
            return Err(Error::Config("no strategy enabled".to_string()));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        info!(
            "Starting analysis loop: {} symbols, {} strategies, every {}ms",
            settings.watchlist.len(),
            settings.strategies.len(),
            settings.cycle_interval_ms
        );

        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(settings.cycle_interval_ms));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.try_run_cycle().await {
                            Ok(Some(record)) => debug!(
                                "Cycle {} done: {} signals, {} executions, {} errors",
                                record.cycle_number,
                                record.signals_generated,
                                record.executions_performed,
                                record.errors.len()
                            ),
                            Ok(None) => warn!("Previous cycle still in flight, tick skipped"),
                            Err(e) => warn!("Cycle failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Analysis loop shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::NotRunning);
        }
        let _ = self.shutdown.send(());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one cycle unless a cycle is already in flight, in which case
    /// nothing happens and no cycle number is consumed.
    pub async fn try_run_cycle(&self) -> Result<Option<CycleRecord>> {
        if self
            .cycle_guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }
        let result = self.run_cycle().await;
        self.cycle_guard.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    /// One full pass over the watch-list.
    async fn run_cycle(&self) -> Result<CycleRecord> {
        let settings = self.settings.read().await.clone();
        let cycle_number = self.cycles.next_id().await;
        debug!("Cycle {} starting", cycle_number);

        let mut table = Vec::with_capacity(settings.watchlist.len());
        let mut signals_by_market = BTreeMap::new();
        let mut errors = Vec::new();
        let mut signals_generated = 0u32;
        let mut executions_performed = 0u32;

        for symbol in &settings.watchlist {
            match self.process_symbol(symbol, &settings).await {
                Ok(report) => {
                    signals_generated += report.signals_generated;
                    signals_by_market.insert(symbol.clone(), report.signals_generated);
                    table.push(report.row);
                    if report.executed {
                        executions_performed += 1;
                    }
                    if let Some(error) = report.error {
                        errors.push(format!("{}: {}", symbol, error));
                    }
                }
                Err(e) => {
                    warn!("Symbol {} failed during cycle {}: {}", symbol, cycle_number, e);
                    errors.push(format!("{}: {}", symbol, e));
                }
            }
        }

        let record = CycleRecord {
            cycle_number,
            timestamp: chrono::Utc::now(),
            signals_generated,
            executions_performed,
            signals_by_market,
            table,
            errors,
        };

        // A write failure leaves the meta untouched, so the number is
        // reissued to the next cycle and the sequence stays gapless.
        if let Err(e) = self.cycles.append_with_id(cycle_number, &record).await {
            warn!("Failed to journal cycle {}: {}", cycle_number, e);
        }

        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
        *self.last_cycle.write().await = Some(record.clone());
        Ok(record)
    }

    /// Analyze one symbol, vote, and execute if consensus clears.
    async fn process_symbol(&self, symbol: &str, settings: &EngineSettings) -> Result<SymbolReport> {
        let candles = self
            .market
            .get_candles(symbol, &settings.interval, settings.candle_limit)
            .await?;
        let composite = generate_signal(symbol, &candles);

        // Fetched once per symbol, lazily; only trend strategies use it.
        let confirm_candles = match &settings.confirmation_interval {
            Some(interval) => Some(
                self.market
                    .get_candles(symbol, interval, settings.candle_limit)
                    .await?,
            ),
            None => None,
        };

        let mut row = TableRow {
            market: symbol.to_string(),
            strategies: BTreeMap::new(),
        };
        let mut signals_generated = 0u32;

        for (kind, weight) in &settings.strategies {
            let mut signal = kind.evaluate(symbol, &candles, *weight);

            // Trend strategies must agree with the higher timeframe; a
            // disagreement neutralizes the vote.
            if let Some(confirm) = &confirm_candles {
                if matches!(kind, StrategyKind::EmaTrend | StrategyKind::MacdMomentum)
                    && !signal.direction.is_neutral()
                {
                    let higher = kind.evaluate(symbol, confirm, *weight);
                    if higher.direction != signal.direction {
                        debug!(
                            "{} on {} vetoed by higher timeframe ({} vs {})",
                            kind.id(),
                            symbol,
                            signal.direction,
                            higher.direction
                        );
                        signal.direction = SignalDirection::Neutral;
                        signal.strength = 0.0;
                        signal.confidence = 0.0;
                    }
                }
            }

            row.strategies.insert(
                kind.id().to_string(),
                StrategyCell {
                    direction: signal.direction,
                    strength: signal.strength,
                },
            );
            if !signal.direction.is_neutral() {
                signals_generated += 1;
            }
            self.consensus.publish(signal);
        }

        let outcome = self.consensus.evaluate(symbol).await;
        debug!(
            "{}: consensus {} {} (strength {:.1}, agreement {:.2}, confidence {:.2})",
            symbol,
            outcome.recommendation,
            outcome.direction,
            outcome.strength,
            outcome.agreement_ratio,
            outcome.confidence
        );

        let mut executed = false;
        let mut error = None;
        if outcome.recommendation == Recommendation::Execute {
            match self.execute_entry(symbol, &composite, &outcome, settings).await {
                Ok(did) => executed = did,
                Err(e) => {
                    warn!("Execution on {} rejected: {}", symbol, e);
                    error = Some(e.to_string());
                }
            }
        }

        Ok(SymbolReport {
            row,
            signals_generated,
            executed,
            error,
        })
    }

    /// Open a position for a consensus EXECUTE. Returns false when a
    /// local gate (strength floor, position limits) stands down without
    /// it being an error.
    async fn execute_entry(
        &self,
        symbol: &str,
        composite: &Signal,
        outcome: &ConsensusOutcome,
        settings: &EngineSettings,
    ) -> Result<bool> {
        if composite.strength < settings.min_signal_strength {
            debug!(
                "{}: composite strength {:.1} below floor {:.1}, standing down",
                symbol, composite.strength, settings.min_signal_strength
            );
            return Ok(false);
        }

        let Some(side) = outcome.direction.order_side() else {
            return Ok(false);
        };

        if self.book.open_count().await >= settings.max_open_positions {
            debug!("{}: max open positions reached, standing down", symbol);
            return Ok(false);
        }
        if self.book.open_for_symbol(symbol).await.len() >= settings.max_positions_per_symbol {
            debug!("{}: symbol position limit reached, standing down", symbol);
            return Ok(false);
        }

        let balances = self.trading.get_account_balances().await?;
        let sized = self
            .risk
            .size_position(balances.available, composite.price, side, 1.0)
            .await;

        let open_positions = self.book.open_positions().await;
        let proposal = TradeProposal {
            symbol: symbol.to_string(),
            side,
            quantity: sized.quantity,
            price: composite.price,
            leverage: sized.leverage,
        };
        let report = self
            .risk
            .validate_trade(&proposal, balances, &open_positions)
            .await;
        if !report.valid {
            return Err(Error::ValidationRejected {
                reasons: report.reasons,
            });
        }
        for warning in &report.warnings {
            warn!("{}: {}", symbol, warning);
        }
        let quantity = report.adjusted_quantity.unwrap_or(sized.quantity);

        let receipt = self
            .trading
            .place_order(&OrderRequest::market(symbol, side, quantity))
            .await?;
        let fill_price = if receipt.price > 0.0 {
            receipt.price
        } else {
            composite.price
        };

        // Protective levels are anchored on the actual fill, with the
        // percent parameters in force at this moment frozen onto the
        // position.
        let params = self.risk.params().await;
        let sl = params.stop_loss_percent / 100.0;
        let tp = params.take_profit_percent / 100.0;
        let (stop_loss, take_profit) = match side {
            OrderSide::Buy => (fill_price * (1.0 - sl), fill_price * (1.0 + tp)),
            OrderSide::Sell => (fill_price * (1.0 + sl), fill_price * (1.0 - tp)),
        };

        let position = self
            .book
            .open(Position::open(
                symbol.to_string(),
                side,
                receipt.executed_quantity,
                fill_price,
                stop_loss,
                take_profit,
                params.stop_loss_percent,
                params.take_profit_percent,
                receipt.order_id.clone(),
            ))
            .await?;

        let record = ExecutionRecord {
            id: self.executions.next_id().await,
            timestamp: chrono::Utc::now(),
            market: symbol.to_string(),
            signals: outcome.contributing_signals.clone(),
            position_value: receipt.executed_quantity * fill_price,
            status: receipt.status.clone(),
            execution_details: ExecutionDetails {
                order_id: receipt.order_id.clone(),
                quantity: receipt.executed_quantity,
                price: fill_price,
            },
            stop_win_loss: StopWinLoss {
                take_profit_price: take_profit,
                stop_loss_price: stop_loss,
            },
        };
        if let Err(e) = self.executions.append_with_id(record.id, &record).await {
            warn!("Failed to journal execution on {}: {}", symbol, e);
        }

        info!(
            "Executed {} {} {:.8} @ {:.8} (position {})",
            side, symbol, receipt.executed_quantity, fill_price, position.id
        );
        Ok(true)
    }

    /// One-shot analysis of a single symbol, outside the cycle. Signals
    /// are not published to the consensus window and no cooldown is
    /// armed.
    pub async fn analyze(&self, symbol: &str) -> Result<(Signal, Vec<StrategySignal>)> {
        let settings = self.settings.read().await.clone();
        let candles = self
            .market
            .get_candles(symbol, &settings.interval, settings.candle_limit)
            .await?;
        let composite = generate_signal(symbol, &candles);
        let votes = settings
            .strategies
            .iter()
            .map(|(kind, weight)| kind.evaluate(symbol, &candles, *weight))
            .collect();
        Ok((composite, votes))
    }

    pub async fn status(&self) -> EngineStatus {
        let settings = self.settings.read().await;
        let last_cycle = self.last_cycle.read().await;
        let executions_meta = self.executions.meta().await;
        EngineStatus {
            running: self.is_running(),
            watchlist: settings.watchlist.clone(),
            cycles_completed: self.cycles_completed.load(Ordering::SeqCst),
            last_cycle_number: last_cycle.as_ref().map(|c| c.cycle_number),
            last_cycle_at: last_cycle.as_ref().map(|c| c.timestamp),
            last_cycle_errors: last_cycle.as_ref().map(|c| c.errors.len()),
            total_executions: executions_meta.total_count,
            open_positions: self.book.open_count().await,
            active_cooldowns: self
                .consensus
                .active_cooldowns()
                .into_iter()
                .map(|(symbol, seconds_remaining)| CooldownStatus {
                    symbol,
                    seconds_remaining,
                })
                .collect(),
        }
    }

    pub async fn update_settings(&self, settings: EngineSettings) {
        info!(
            "Engine settings updated: {} symbols, {} strategies",
            settings.watchlist.len(),
            settings.strategies.len()
        );
        *self.settings.write().await = settings;
    }

    pub async fn update_risk_parameters(&self, update: RiskParametersUpdate) {
        self.risk.update_params(update).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusParams;
    use crate::exchange::paper::PaperExchange;
    use crate::exchange::types::Candle;
    use crate::risk::RiskParameters;
    use chrono::Utc;
    use tempfile::TempDir;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let now = Utc::now();
        closes.iter().map(|c| Candle::flat(*c, now, now)).collect()
    }

    fn declining(len: usize, start: f64) -> Vec<f64> {
        (0..len).map(|i| start - i as f64).collect()
    }

    struct Harness {
        engine: Arc<RotativeEngine>,
        paper: Arc<PaperExchange>,
        _dir: TempDir,
    }

    async fn harness(settings: EngineSettings, params: ConsensusParams) -> Harness {
        let dir = TempDir::new().unwrap();
        let paper = Arc::new(PaperExchange::new(10_000.0));
        let cycles = Arc::new(Journal::open(dir.path(), "cycle").await.unwrap());
        let executions = Arc::new(Journal::open(dir.path(), "execution").await.unwrap());
        let engine = Arc::new(RotativeEngine::new(
            paper.clone(),
            paper.clone(),
            Arc::new(ConsensusEngine::new(params)),
            Arc::new(RiskManager::new(RiskParameters::default())),
            Arc::new(PositionBook::new(None)),
            cycles,
            executions,
            settings,
        ));
        Harness {
            engine,
            paper,
            _dir: dir,
        }
    }

    fn settings(watchlist: &[&str]) -> EngineSettings {
        EngineSettings {
            watchlist: watchlist.iter().map(|s| s.to_string()).collect(),
            interval: "15m".to_string(),
            confirmation_interval: None,
            candle_limit: 100,
            cycle_interval_ms: 60_000,
            min_signal_strength: 0.0,
            max_open_positions: 5,
            max_positions_per_symbol: 1,
            strategies: vec![(StrategyKind::RsiReversion, 1.0)],
        }
    }

    #[tokio::test]
    async fn test_start_rejects_empty_watchlist() {
        let h = harness(settings(&[]), ConsensusParams::default()).await;
        let err = h.engine.start().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!h.engine.is_running());
    }

    #[tokio::test]
    async fn test_start_rejects_empty_roster() {
        let mut s = settings(&["BTCUSDT"]);
        s.strategies.clear();
        let h = harness(s, ConsensusParams::default()).await;
        assert!(matches!(
            h.engine.start().await.unwrap_err(),
            Error::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let h = harness(settings(&["BTCUSDT"]), ConsensusParams::default()).await;
        h.paper
            .set_candles("BTCUSDT", candles_from_closes(&declining(60, 200.0)))
            .await;
        h.engine.start().await.unwrap();
        assert!(matches!(
            h.engine.start().await.unwrap_err(),
            Error::AlreadyRunning
        ));
        h.engine.stop().unwrap();
        assert!(matches!(h.engine.stop().unwrap_err(), Error::NotRunning));
    }

    #[tokio::test]
    async fn test_in_flight_cycle_skips_tick() {
        let h = harness(settings(&["BTCUSDT"]), ConsensusParams::default()).await;
        h.engine.cycle_guard.store(true, Ordering::SeqCst);

        let skipped = h.engine.try_run_cycle().await.unwrap();
        assert!(skipped.is_none());
        // No cycle number consumed by the skipped tick.
        assert_eq!(h.engine.cycles.meta().await.last_id, 0);

        h.engine.cycle_guard.store(false, Ordering::SeqCst);
        h.paper
            .set_candles("BTCUSDT", candles_from_closes(&declining(60, 200.0)))
            .await;
        let record = h.engine.try_run_cycle().await.unwrap().unwrap();
        assert_eq!(record.cycle_number, 1);
    }

    #[tokio::test]
    async fn test_failing_symbol_is_isolated() {
        let h = harness(settings(&["BTCUSDT", "ETHUSDT"]), ConsensusParams::default()).await;
        // Only ETHUSDT has data; BTCUSDT must fail without sinking the cycle.
        h.paper
            .set_candles("ETHUSDT", candles_from_closes(&declining(60, 3_000.0)))
            .await;

        let record = h.engine.try_run_cycle().await.unwrap().unwrap();
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].starts_with("BTCUSDT"));
        assert_eq!(record.table.len(), 1);
        assert_eq!(record.table[0].market, "ETHUSDT");
        // The cycle was still journaled.
        assert_eq!(h.engine.cycles.meta().await.last_id, 1);
    }

    #[tokio::test]
    async fn test_execute_path_opens_position_and_journals() {
        let h = harness(settings(&["BTCUSDT"]), ConsensusParams::default()).await;
        // A steady decline drives RSI deep oversold: a strong long vote.
        h.paper
            .set_candles("BTCUSDT", candles_from_closes(&declining(60, 200.0)))
            .await;

        let record = h.engine.try_run_cycle().await.unwrap().unwrap();
        assert_eq!(record.executions_performed, 1);
        assert_eq!(record.signals_generated, 1);
        assert!(record.errors.is_empty());

        assert_eq!(h.engine.book.open_count().await, 1);
        let position = &h.engine.book.open_positions().await[0];
        assert_eq!(position.symbol, "BTCUSDT");
        // Stops were frozen from the default 2% / 6% parameters.
        assert!((position.stop_loss - position.open_price * 0.98).abs() < 1e-9);
        assert!((position.take_profit - position.open_price * 1.06).abs() < 1e-9);

        let exec: ExecutionRecord = h.engine.executions.read(1).await.unwrap();
        assert_eq!(exec.market, "BTCUSDT");
        assert_eq!(exec.signals.len(), 1);
        assert_eq!(exec.signals[0].strategy_id, "rsi_reversion");

        // The fill armed a cooldown: the next cycle cannot re-enter.
        assert!(h.engine.consensus.is_cooling("BTCUSDT"));
        let second = h.engine.try_run_cycle().await.unwrap().unwrap();
        assert_eq!(second.executions_performed, 0);
        assert_eq!(h.engine.book.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_strength_floor_stands_down() {
        let mut s = settings(&["BTCUSDT"]);
        s.min_signal_strength = 100.0;
        let h = harness(s, ConsensusParams::default()).await;
        h.paper
            .set_candles("BTCUSDT", candles_from_closes(&declining(60, 200.0)))
            .await;

        let record = h.engine.try_run_cycle().await.unwrap().unwrap();
        assert_eq!(record.executions_performed, 0);
        assert!(record.errors.is_empty());
        assert_eq!(h.engine.book.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_symbol_position_limit_stands_down() {
        let h = harness(settings(&["BTCUSDT"]), ConsensusParams::default()).await;
        h.paper
            .set_candles("BTCUSDT", candles_from_closes(&declining(60, 200.0)))
            .await;

        h.engine.try_run_cycle().await.unwrap().unwrap();
        assert_eq!(h.engine.book.open_count().await, 1);

        // Clear the cooldown by re-arming consensus state is not
        // possible; instead run with a fresh consensus but shared book.
        let consensus = Arc::new(ConsensusEngine::new(ConsensusParams::default()));
        let engine = Arc::new(RotativeEngine::new(
            h.paper.clone(),
            h.paper.clone(),
            consensus,
            Arc::new(RiskManager::new(RiskParameters::default())),
            h.engine.book.clone(),
            h.engine.cycles.clone(),
            h.engine.executions.clone(),
            settings(&["BTCUSDT"]),
        ));
        let record = engine.try_run_cycle().await.unwrap().unwrap();
        assert_eq!(record.executions_performed, 0);
        assert_eq!(engine.book.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_reflects_cycles_and_positions() {
        let h = harness(settings(&["BTCUSDT"]), ConsensusParams::default()).await;
        h.paper
            .set_candles("BTCUSDT", candles_from_closes(&declining(60, 200.0)))
            .await;

        let before = h.engine.status().await;
        assert!(!before.running);
        assert_eq!(before.cycles_completed, 0);
        assert!(before.last_cycle_number.is_none());

        h.engine.try_run_cycle().await.unwrap().unwrap();
        let after = h.engine.status().await;
        assert_eq!(after.cycles_completed, 1);
        assert_eq!(after.last_cycle_number, Some(1));
        assert_eq!(after.total_executions, 1);
        assert_eq!(after.open_positions, 1);
        assert_eq!(after.active_cooldowns.len(), 1);
        assert_eq!(after.active_cooldowns[0].symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn test_analyze_does_not_touch_consensus() {
        let h = harness(settings(&["BTCUSDT"]), ConsensusParams::default()).await;
        h.paper
            .set_candles("BTCUSDT", candles_from_closes(&declining(60, 200.0)))
            .await;

        let (composite, votes) = h.engine.analyze("BTCUSDT").await.unwrap();
        assert_eq!(composite.symbol, "BTCUSDT");
        assert_eq!(votes.len(), 1);
        assert_eq!(h.engine.consensus.window_depth("BTCUSDT"), 0);
        assert!(!h.engine.consensus.is_cooling("BTCUSDT"));
    }

    #[tokio::test]
    async fn test_settings_hot_swap() {
        let h = harness(settings(&["BTCUSDT"]), ConsensusParams::default()).await;
        let mut next = settings(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        next.min_signal_strength = 42.0;
        h.engine.update_settings(next).await;

        let status = h.engine.status().await;
        assert_eq!(status.watchlist.len(), 3);
    }
}
