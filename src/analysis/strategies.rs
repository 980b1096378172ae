//! Per-strategy signal evaluators
//!
//! Five independent opinions over the same candle window, each reading a
//! single indicator family. They emit directional [`StrategySignal`]s for
//! the consensus window rather than trading on their own. Strength maps
//! the indicator's zone depth into a clamped 0-100 band; the confidence
//! the consensus engine consumes is strength scaled to 0-1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::indicators::{
    self, BOLLINGER_PERIOD, BOLLINGER_STD_DEV, EMA_FAST_PERIOD, EMA_SLOW_PERIOD,
    MIN_CANDLES_FOR_ANALYSIS, RSI_PERIOD, STOCHASTIC_D_PERIOD, STOCHASTIC_K_PERIOD,
};
use crate::exchange::types::{Candle, OrderSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Long,
    Short,
    Neutral,
}

impl SignalDirection {
    pub fn is_neutral(&self) -> bool {
        matches!(self, SignalDirection::Neutral)
    }

    /// Order side for an executable direction.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            SignalDirection::Long => Some(OrderSide::Buy),
            SignalDirection::Short => Some(OrderSide::Sell),
            SignalDirection::Neutral => None,
        }
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalDirection::Long => write!(f, "LONG"),
            SignalDirection::Short => write!(f, "SHORT"),
            SignalDirection::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// One strategy's opinion on one symbol at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySignal {
    pub strategy_id: String,
    pub symbol: String,
    pub direction: SignalDirection,
    /// Zone depth mapped to 0-100.
    pub strength: f64,
    /// Strength rescaled to 0-1 for consensus weighting.
    pub confidence: f64,
    /// Configured weight of the originating strategy.
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    RsiReversion,
    MacdMomentum,
    EmaTrend,
    BollingerFade,
    StochasticCross,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::RsiReversion,
        StrategyKind::MacdMomentum,
        StrategyKind::EmaTrend,
        StrategyKind::BollingerFade,
        StrategyKind::StochasticCross,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            StrategyKind::RsiReversion => "rsi_reversion",
            StrategyKind::MacdMomentum => "macd_momentum",
            StrategyKind::EmaTrend => "ema_trend",
            StrategyKind::BollingerFade => "bollinger_fade",
            StrategyKind::StochasticCross => "stochastic_cross",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::RsiReversion => "RSI Reversion 14",
            StrategyKind::MacdMomentum => "MACD Momentum 12/26/9",
            StrategyKind::EmaTrend => "EMA Trend 12/26",
            StrategyKind::BollingerFade => "Bollinger Fade 20/2",
            StrategyKind::StochasticCross => "Stochastic Cross 14/3",
        }
    }

    pub fn from_id(id: &str) -> Option<StrategyKind> {
        StrategyKind::ALL.iter().copied().find(|k| k.id() == id)
    }

    /// Run this strategy over a candle window. Short windows yield a
    /// NEUTRAL signal with strength 0 so the consensus window can tell
    /// "no data" from "no opinion".
    pub fn evaluate(&self, symbol: &str, candles: &[Candle], weight: f64) -> StrategySignal {
        if candles.len() < MIN_CANDLES_FOR_ANALYSIS {
            return self.make(symbol, SignalDirection::Neutral, 0.0, weight);
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let price = closes[closes.len() - 1];

        match self {
            StrategyKind::RsiReversion => {
                let rsi = indicators::rsi(&closes, RSI_PERIOD);
                if rsi < 30.0 {
                    self.make(symbol, SignalDirection::Long, ((30.0 - rsi) * 3.0).clamp(40.0, 95.0), weight)
                } else if rsi > 70.0 {
                    self.make(symbol, SignalDirection::Short, ((rsi - 70.0) * 3.0).clamp(40.0, 95.0), weight)
                } else {
                    self.make(symbol, SignalDirection::Neutral, 15.0, weight)
                }
            }
            StrategyKind::MacdMomentum => {
                let macd = indicators::macd(&closes);
                // Basis points of price so the scale is symbol-independent.
                let normalized = macd.macd / price * 10_000.0;
                if normalized > 0.5 {
                    self.make(symbol, SignalDirection::Long, (normalized * 30.0).clamp(30.0, 90.0), weight)
                } else if normalized < -0.5 {
                    self.make(symbol, SignalDirection::Short, (normalized.abs() * 30.0).clamp(30.0, 90.0), weight)
                } else {
                    self.make(symbol, SignalDirection::Neutral, 15.0, weight)
                }
            }
            StrategyKind::EmaTrend => {
                let ema_fast = indicators::ema(&closes, EMA_FAST_PERIOD);
                let ema_slow = indicators::ema(&closes, EMA_SLOW_PERIOD);
                let diff = (ema_fast - ema_slow) / ema_slow;
                if diff > 0.015 {
                    self.make(symbol, SignalDirection::Long, (diff * 600.0).clamp(30.0, 95.0), weight)
                } else if diff < -0.015 {
                    self.make(symbol, SignalDirection::Short, (diff.abs() * 600.0).clamp(30.0, 95.0), weight)
                } else {
                    self.make(symbol, SignalDirection::Neutral, 15.0, weight)
                }
            }
            StrategyKind::BollingerFade => {
                let bb = indicators::bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);
                let band_width = bb.upper - bb.lower;
                if price < bb.lower {
                    let depth = (bb.lower - price) / band_width * 100.0;
                    self.make(symbol, SignalDirection::Long, (50.0 + depth * 3.0).clamp(50.0, 95.0), weight)
                } else if price > bb.upper {
                    let depth = (price - bb.upper) / band_width * 100.0;
                    self.make(symbol, SignalDirection::Short, (50.0 + depth * 3.0).clamp(50.0, 95.0), weight)
                } else {
                    self.make(symbol, SignalDirection::Neutral, 20.0, weight)
                }
            }
            StrategyKind::StochasticCross => {
                let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
                let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
                let stoch = indicators::stochastic(
                    &highs,
                    &lows,
                    &closes,
                    STOCHASTIC_K_PERIOD,
                    STOCHASTIC_D_PERIOD,
                );
                if stoch.k < 20.0 {
                    self.make(symbol, SignalDirection::Long, ((20.0 - stoch.k) * 4.0).clamp(40.0, 90.0), weight)
                } else if stoch.k > 80.0 {
                    self.make(symbol, SignalDirection::Short, ((stoch.k - 80.0) * 4.0).clamp(40.0, 90.0), weight)
                } else {
                    self.make(symbol, SignalDirection::Neutral, 15.0, weight)
                }
            }
        }
    }

    fn make(
        &self,
        symbol: &str,
        direction: SignalDirection,
        strength: f64,
        weight: f64,
    ) -> StrategySignal {
        let strength = strength.round().clamp(0.0, 100.0);
        StrategySignal {
            strategy_id: self.id().to_string(),
            symbol: symbol.to_string(),
            direction,
            strength,
            confidence: strength / 100.0,
            weight,
            timestamp: Utc::now(),
        }
    }
}
