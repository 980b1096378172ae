//! Multi-signal consensus
//!
//! Collects recent [`StrategySignal`]s per symbol in a bounded time
//! window and reduces them to one decision. Long and short weighted
//! scores are normalized by total contributing weight; a side must clear
//! a normalized floor and beat the other side to become the consensus
//! direction. EXECUTE additionally requires enough contributing signals,
//! an agreement ratio and a confidence floor, and no active per-symbol
//! cooldown. An EXECUTE arms the cooldown so the same hot window cannot
//! re-trigger on the next tick.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::strategies::{SignalDirection, StrategySignal};

/// Per-symbol signal lists never grow past this many entries.
const MAX_SIGNALS_PER_SYMBOL: usize = 100;

/// Narrow ingestion seam: producers hand signals over and never touch
/// the window's internals.
pub trait SignalPublisher: Send + Sync {
    fn publish(&self, signal: StrategySignal);
}

/// Aggregation thresholds. Hot-swappable at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusParams {
    /// Non-neutral signals required before a decision is considered.
    pub min_signals_required: usize,
    /// Fraction of contributing signals that must agree with the majority.
    pub min_agreement_ratio: f64,
    /// Weighted-mean confidence floor (0-1).
    pub min_confidence: f64,
    /// Normalized score a side must clear to become the direction (0-1).
    pub score_floor: f64,
    /// Signals older than this are pruned before aggregation.
    pub window_secs: u64,
    /// Quiet period armed per symbol after an EXECUTE.
    pub cooldown_secs: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            min_signals_required: 1,
            min_agreement_ratio: 0.6,
            min_confidence: 0.6,
            score_floor: 0.3,
            window_secs: 300,
            cooldown_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Execute,
    Wait,
    Skip,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::Execute => write!(f, "EXECUTE"),
            Recommendation::Wait => write!(f, "WAIT"),
            Recommendation::Skip => write!(f, "SKIP"),
        }
    }
}

/// Result of one consensus evaluation for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusOutcome {
    pub symbol: String,
    pub direction: SignalDirection,
    /// Winning weighted score normalized by total weight (0-100).
    pub strength: f64,
    /// Agreeing / contributing signals (0-1).
    pub agreement_ratio: f64,
    /// Weighted mean of per-signal confidence (0-1).
    pub confidence: f64,
    /// Non-neutral signals that contributed.
    pub signal_count: usize,
    pub recommendation: Recommendation,
    /// Snapshot of the non-neutral signals behind this decision.
    pub contributing_signals: Vec<StrategySignal>,
}

impl ConsensusOutcome {
    fn skip(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction: SignalDirection::Neutral,
            strength: 0.0,
            agreement_ratio: 0.0,
            confidence: 0.0,
            signal_count: 0,
            recommendation: Recommendation::Skip,
            contributing_signals: Vec::new(),
        }
    }
}

/// Bounded time-window of recent signals keyed by symbol. One writer per
/// symbol; readers always receive a snapshot copy.
pub struct SignalWindow {
    signals: DashMap<String, Vec<StrategySignal>>,
}

impl SignalWindow {
    pub fn new() -> Self {
        Self {
            signals: DashMap::new(),
        }
    }

    /// Point-in-time copy of one symbol's signals, stale entries pruned.
    pub fn snapshot(&self, symbol: &str, max_age: Duration) -> Vec<StrategySignal> {
        let cutoff = Utc::now() - max_age;
        match self.signals.get_mut(symbol) {
            Some(mut entry) => {
                entry.retain(|s| s.timestamp >= cutoff);
                entry.clone()
            }
            None => Vec::new(),
        }
    }

    pub fn depth(&self, symbol: &str) -> usize {
        self.signals.get(symbol).map(|e| e.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.signals.clear();
    }
}

impl Default for SignalWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalPublisher for SignalWindow {
    fn publish(&self, signal: StrategySignal) {
        let mut entry = self.signals.entry(signal.symbol.clone()).or_default();
        entry.push(signal);
        if entry.len() > MAX_SIGNALS_PER_SYMBOL {
            let excess = entry.len() - MAX_SIGNALS_PER_SYMBOL;
            entry.drain(..excess);
        }
    }
}

/// Per-symbol quiet periods. Expired entries are dropped on read.
pub struct CooldownTracker {
    until: DashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            until: DashMap::new(),
        }
    }

    pub fn arm(&self, symbol: &str, duration: Duration) {
        self.until.insert(symbol.to_string(), Utc::now() + duration);
    }

    pub fn is_active(&self, symbol: &str) -> bool {
        if let Some(expiry) = self.until.get(symbol) {
            if *expiry > Utc::now() {
                return true;
            }
        }
        self.until.remove_if(symbol, |_, expiry| *expiry <= Utc::now());
        false
    }

    /// Symbols currently cooling with seconds remaining.
    pub fn active(&self) -> Vec<(String, i64)> {
        let now = Utc::now();
        self.until
            .iter()
            .filter(|e| *e.value() > now)
            .map(|e| (e.key().clone(), (*e.value() - now).num_seconds()))
            .collect()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct Aggregate {
    direction: SignalDirection,
    strength: f64,
    agreement_ratio: f64,
    confidence: f64,
    signal_count: usize,
}

/// Pure reduction of a signal set. Neutral signals abstain entirely.
fn aggregate(signals: &[StrategySignal], score_floor: f64) -> Aggregate {
    let mut long_score = 0.0;
    let mut short_score = 0.0;
    let mut long_count = 0usize;
    let mut short_count = 0usize;
    let mut total_weight = 0.0;
    let mut confidence_num = 0.0;
    let mut confidence_den = 0.0;

    for signal in signals {
        if signal.direction.is_neutral() {
            continue;
        }
        let weighted = signal.strength * signal.weight;
        match signal.direction {
            SignalDirection::Long => {
                long_score += weighted;
                long_count += 1;
            }
            SignalDirection::Short => {
                short_score += weighted;
                short_count += 1;
            }
            SignalDirection::Neutral => unreachable!(),
        }
        total_weight += signal.weight;
        confidence_num += signal.strength * signal.confidence * signal.weight;
        confidence_den += weighted;
    }

    let signal_count = long_count + short_count;
    if signal_count == 0 || total_weight == 0.0 {
        return Aggregate {
            direction: SignalDirection::Neutral,
            strength: 0.0,
            agreement_ratio: 0.0,
            confidence: 0.0,
            signal_count: 0,
        };
    }

    let normalized_long = long_score / total_weight / 100.0;
    let normalized_short = short_score / total_weight / 100.0;

    let (direction, winning_score, agreeing) =
        if normalized_long > normalized_short && normalized_long > score_floor {
            (SignalDirection::Long, long_score, long_count)
        } else if normalized_short > normalized_long && normalized_short > score_floor {
            (SignalDirection::Short, short_score, short_count)
        } else {
            (SignalDirection::Neutral, 0.0, 0)
        };

    let strength = winning_score / total_weight;
    let agreement_ratio = agreeing as f64 / signal_count as f64;
    let confidence = if confidence_den > 0.0 {
        confidence_num / confidence_den
    } else {
        0.0
    };

    Aggregate {
        direction,
        strength,
        agreement_ratio,
        confidence,
        signal_count,
    }
}

/// Owns the signal window, the cooldown state and the thresholds.
pub struct ConsensusEngine {
    window: SignalWindow,
    cooldowns: CooldownTracker,
    params: tokio::sync::RwLock<ConsensusParams>,
}

impl ConsensusEngine {
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            window: SignalWindow::new(),
            cooldowns: CooldownTracker::new(),
            params: tokio::sync::RwLock::new(params),
        }
    }

    pub async fn params(&self) -> ConsensusParams {
        *self.params.read().await
    }

    /// Swap thresholds without restarting; takes effect next evaluation.
    pub async fn update_params(&self, params: ConsensusParams) {
        *self.params.write().await = params;
    }

    pub fn window_depth(&self, symbol: &str) -> usize {
        self.window.depth(symbol)
    }

    pub fn active_cooldowns(&self) -> Vec<(String, i64)> {
        self.cooldowns.active()
    }

    pub fn is_cooling(&self, symbol: &str) -> bool {
        self.cooldowns.is_active(symbol)
    }

    /// Quiet a symbol for the configured period, e.g. right after one of
    /// its positions closed.
    pub async fn arm_cooldown(&self, symbol: &str) {
        let params = *self.params.read().await;
        self.cooldowns
            .arm(symbol, Duration::seconds(params.cooldown_secs as i64));
    }

    /// Reduce the current window for `symbol` to a recommendation.
    /// An EXECUTE arms the symbol's cooldown as a side effect.
    pub async fn evaluate(&self, symbol: &str) -> ConsensusOutcome {
        let params = *self.params.read().await;
        let signals = self
            .window
            .snapshot(symbol, Duration::seconds(params.window_secs as i64));
        if signals.is_empty() {
            return ConsensusOutcome::skip(symbol);
        }

        let agg = aggregate(&signals, params.score_floor);
        let cooling = self.cooldowns.is_active(symbol);

        let meets_execute = !agg.direction.is_neutral()
            && agg.signal_count >= params.min_signals_required
            && agg.agreement_ratio >= params.min_agreement_ratio
            && agg.confidence >= params.min_confidence
            && !cooling;

        let recommendation = if meets_execute {
            self.cooldowns
                .arm(symbol, Duration::seconds(params.cooldown_secs as i64));
            Recommendation::Execute
        } else if !agg.direction.is_neutral()
            && agg.agreement_ratio >= params.min_agreement_ratio / 2.0
        {
            Recommendation::Wait
        } else {
            Recommendation::Skip
        };

        debug!(
            "Consensus for {}: {} dir={} strength={:.1} agreement={:.2} confidence={:.2} signals={} cooling={}",
            symbol,
            recommendation,
            agg.direction,
            agg.strength,
            agg.agreement_ratio,
            agg.confidence,
            agg.signal_count,
            cooling
        );

        let contributing_signals = signals
            .into_iter()
            .filter(|s| !s.direction.is_neutral())
            .collect();

        ConsensusOutcome {
            symbol: symbol.to_string(),
            direction: agg.direction,
            strength: agg.strength,
            agreement_ratio: agg.agreement_ratio,
            confidence: agg.confidence,
            signal_count: agg.signal_count,
            recommendation,
            contributing_signals,
        }
    }
}

impl SignalPublisher for ConsensusEngine {
    fn publish(&self, signal: StrategySignal) {
        self.window.publish(signal);
    }
}
