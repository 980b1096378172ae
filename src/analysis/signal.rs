//! Composite directional signal
//!
//! Folds one indicator snapshot into a BUY/SELL/HOLD call with a 0-100
//! strength score and human-readable reasons. Each indicator contributes
//! graded points to a buy or sell score; the net score is normalized
//! against the maximum theoretical score and only a decisive net beyond
//! the execute threshold leaves HOLD. Mixed evidence always holds: the
//! engine is biased toward inaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analysis::indicators::{IndicatorSnapshot, MIN_CANDLES_FOR_ANALYSIS};
use crate::exchange::types::Candle;

/// Theoretical maximum net score with every indicator maximally aligned.
pub const MAX_COMPOSITE_SCORE: f64 = 150.0;

/// Net score at which a composite signal becomes actionable.
pub const EXECUTE_SCORE_THRESHOLD: i32 = 60;

const MODERATE_SCORE_THRESHOLD: i32 = 40;
const WEAK_SCORE_THRESHOLD: i32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, SignalAction::Hold)
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// One evaluation of one symbol. Immutable after emission except for the
/// execution outcome fields attached when a downstream order is placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub symbol: String,
    pub direction: SignalAction,
    pub strength: f64,
    pub indicators: IndicatorSnapshot,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Signal {
    fn hold(symbol: &str, price: f64, reason: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction: SignalAction::Hold,
            strength: 0.0,
            indicators: IndicatorSnapshot::neutral(),
            price,
            timestamp: Utc::now(),
            reasons: vec![reason],
            order_id: None,
            execution_price: None,
            status: None,
        }
    }

    /// Attach the order outcome after a successful execution.
    pub fn with_execution(mut self, order_id: String, execution_price: f64, status: String) -> Self {
        self.order_id = Some(order_id);
        self.execution_price = Some(execution_price);
        self.status = Some(status);
        self
    }
}

/// Evaluate a candle window into a composite signal for `symbol`.
///
/// Windows shorter than [`MIN_CANDLES_FOR_ANALYSIS`] produce a HOLD with
/// strength 0 and a neutral snapshot rather than an error.
pub fn generate_signal(symbol: &str, candles: &[Candle]) -> Signal {
    if candles.len() < MIN_CANDLES_FOR_ANALYSIS {
        warn!(
            "Insufficient candle history for {}: {} candles",
            symbol,
            candles.len()
        );
        let price = candles.last().map(|c| c.close).unwrap_or(0.0);
        return Signal::hold(symbol, price, "Insufficient candle history for analysis".into());
    }

    let price = candles[candles.len() - 1].close;
    let indicators = IndicatorSnapshot::from_candles(candles);
    let (direction, strength, reasons) = analyze_snapshot(price, &indicators);

    Signal {
        symbol: symbol.to_string(),
        direction,
        strength,
        indicators,
        price,
        timestamp: Utc::now(),
        reasons,
        order_id: None,
        execution_price: None,
        status: None,
    }
}

/// Graded scoring of one snapshot. Points per indicator:
/// oscillator 25/5, trend-convergence 20/8/2, trend-average spread
/// 18/8/2, baseline deviation 12/6/1, band position 15/8/2,
/// stochastic 18/8/2.
fn analyze_snapshot(price: f64, ind: &IndicatorSnapshot) -> (SignalAction, f64, Vec<String>) {
    let mut reasons = Vec::new();
    let mut buy_score: i32 = 0;
    let mut sell_score: i32 = 0;

    // Oscillator extremity.
    if ind.rsi < 20.0 {
        buy_score += 25;
        reasons.push(format!("RSI extremely oversold ({:.1})", ind.rsi));
    } else if ind.rsi > 80.0 {
        sell_score += 25;
        reasons.push(format!("RSI extremely overbought ({:.1})", ind.rsi));
    } else if ind.rsi < 30.0 {
        buy_score += 5;
        reasons.push(format!("RSI moderately oversold ({:.1})", ind.rsi));
    } else if ind.rsi > 70.0 {
        sell_score += 5;
        reasons.push(format!("RSI moderately overbought ({:.1})", ind.rsi));
    }

    // Trend-convergence crossover, graded by histogram magnitude.
    let macd_strength = ind.macd.histogram.abs();
    let bullish_cross = ind.macd.macd > ind.macd.signal && ind.macd.histogram > 0.0;
    let bearish_cross = ind.macd.macd < ind.macd.signal && ind.macd.histogram < 0.0;
    if bullish_cross && macd_strength > 0.005 {
        buy_score += 20;
        reasons.push(format!(
            "MACD very strong bullish crossover ({:.4})",
            ind.macd.histogram
        ));
    } else if bearish_cross && macd_strength > 0.005 {
        sell_score += 20;
        reasons.push(format!(
            "MACD very strong bearish crossover ({:.4})",
            ind.macd.histogram
        ));
    } else if bullish_cross && macd_strength > 0.002 {
        buy_score += 8;
        reasons.push(format!(
            "MACD moderate bullish crossover ({:.4})",
            ind.macd.histogram
        ));
    } else if bearish_cross && macd_strength > 0.002 {
        sell_score += 8;
        reasons.push(format!(
            "MACD moderate bearish crossover ({:.4})",
            ind.macd.histogram
        ));
    } else if bullish_cross {
        buy_score += 2;
        reasons.push(format!(
            "MACD weak bullish crossover ({:.4})",
            ind.macd.histogram
        ));
    } else if bearish_cross {
        sell_score += 2;
        reasons.push(format!(
            "MACD weak bearish crossover ({:.4})",
            ind.macd.histogram
        ));
    }

    // Trend-average spread as a percentage so it compares across symbols.
    let ema_spread_percent = (ind.ema12 - ind.ema26).abs() / ind.ema26 * 100.0;
    if ind.ema12 > ind.ema26 && ema_spread_percent > 1.0 {
        buy_score += 18;
        reasons.push(format!(
            "EMA12 > EMA26 very strong bullish trend ({:.2}% spread)",
            ema_spread_percent
        ));
    } else if ind.ema12 < ind.ema26 && ema_spread_percent > 1.0 {
        sell_score += 18;
        reasons.push(format!(
            "EMA12 < EMA26 very strong bearish trend ({:.2}% spread)",
            ema_spread_percent
        ));
    } else if ind.ema12 > ind.ema26 && ema_spread_percent > 0.3 {
        buy_score += 8;
        reasons.push(format!(
            "EMA12 > EMA26 moderate bullish trend ({:.2}% spread)",
            ema_spread_percent
        ));
    } else if ind.ema12 < ind.ema26 && ema_spread_percent > 0.3 {
        sell_score += 8;
        reasons.push(format!(
            "EMA12 < EMA26 moderate bearish trend ({:.2}% spread)",
            ema_spread_percent
        ));
    } else if ind.ema12 > ind.ema26 {
        buy_score += 2;
        reasons.push(format!(
            "EMA12 > EMA26 weak bullish trend ({:.2}% spread)",
            ema_spread_percent
        ));
    } else if ind.ema12 < ind.ema26 {
        sell_score += 2;
        reasons.push(format!(
            "EMA12 < EMA26 weak bearish trend ({:.2}% spread)",
            ema_spread_percent
        ));
    }

    // Price deviation from the baseline average. Always contributes.
    let sma_deviation = (price - ind.sma20) / ind.sma20 * 100.0;
    if sma_deviation > 3.0 {
        buy_score += 12;
        reasons.push(format!(
            "Price very significantly above SMA20 (+{:.2}%)",
            sma_deviation
        ));
    } else if sma_deviation < -3.0 {
        sell_score += 12;
        reasons.push(format!(
            "Price very significantly below SMA20 ({:.2}%)",
            sma_deviation
        ));
    } else if sma_deviation > 1.5 {
        buy_score += 6;
        reasons.push(format!("Price moderately above SMA20 (+{:.2}%)", sma_deviation));
    } else if sma_deviation < -1.5 {
        sell_score += 6;
        reasons.push(format!("Price moderately below SMA20 ({:.2}%)", sma_deviation));
    } else if sma_deviation > 0.0 {
        buy_score += 1;
        reasons.push(format!("Price slightly above SMA20 (+{:.2}%)", sma_deviation));
    } else {
        sell_score += 1;
        reasons.push(format!("Price slightly below SMA20 ({:.2}%)", sma_deviation));
    }

    // Position within the volatility bands, 0 at the lower band.
    let bb_position = (price - ind.bollinger_bands.lower)
        / (ind.bollinger_bands.upper - ind.bollinger_bands.lower);
    if bb_position < 0.05 {
        buy_score += 15;
        reasons.push(format!("Price very near lower Bollinger Band ({:.2})", bb_position));
    } else if bb_position > 0.95 {
        sell_score += 15;
        reasons.push(format!("Price very near upper Bollinger Band ({:.2})", bb_position));
    } else if bb_position < 0.15 {
        buy_score += 8;
        reasons.push(format!(
            "Price approaching lower Bollinger Band ({:.2})",
            bb_position
        ));
    } else if bb_position > 0.85 {
        sell_score += 8;
        reasons.push(format!(
            "Price approaching upper Bollinger Band ({:.2})",
            bb_position
        ));
    } else if bb_position < 0.25 {
        buy_score += 2;
        reasons.push(format!(
            "Price near lower Bollinger Band area ({:.2})",
            bb_position
        ));
    } else if bb_position > 0.75 {
        sell_score += 2;
        reasons.push(format!(
            "Price near upper Bollinger Band area ({:.2})",
            bb_position
        ));
    }

    // Stochastic needs both lines in the zone.
    let (k, d) = (ind.stochastic.k, ind.stochastic.d);
    if k < 10.0 && d < 10.0 {
        buy_score += 18;
        reasons.push(format!("Stochastic extremely oversold (K:{:.1}, D:{:.1})", k, d));
    } else if k > 90.0 && d > 90.0 {
        sell_score += 18;
        reasons.push(format!("Stochastic extremely overbought (K:{:.1}, D:{:.1})", k, d));
    } else if k < 20.0 && d < 20.0 {
        buy_score += 8;
        reasons.push(format!("Stochastic moderately oversold (K:{:.1}, D:{:.1})", k, d));
    } else if k > 80.0 && d > 80.0 {
        sell_score += 8;
        reasons.push(format!("Stochastic moderately overbought (K:{:.1}, D:{:.1})", k, d));
    } else if k < 30.0 && d < 30.0 {
        buy_score += 2;
        reasons.push(format!("Stochastic slightly oversold (K:{:.1}, D:{:.1})", k, d));
    } else if k > 70.0 && d > 70.0 {
        sell_score += 2;
        reasons.push(format!("Stochastic slightly overbought (K:{:.1}, D:{:.1})", k, d));
    }

    let net_score = buy_score - sell_score;
    let strength = (net_score.abs() as f64 / MAX_COMPOSITE_SCORE * 100.0).min(100.0);

    let direction = if net_score >= EXECUTE_SCORE_THRESHOLD {
        reasons.push(format!("Very strong bullish consensus ({} points)", net_score));
        SignalAction::Buy
    } else if net_score <= -EXECUTE_SCORE_THRESHOLD {
        reasons.push(format!("Very strong bearish consensus ({} points)", net_score));
        SignalAction::Sell
    } else if net_score >= MODERATE_SCORE_THRESHOLD {
        reasons.push(format!(
            "Moderate bullish signals ({} points) - insufficient for trade",
            net_score
        ));
        SignalAction::Hold
    } else if net_score <= -MODERATE_SCORE_THRESHOLD {
        reasons.push(format!(
            "Moderate bearish signals ({} points) - insufficient for trade",
            net_score
        ));
        SignalAction::Hold
    } else if net_score >= WEAK_SCORE_THRESHOLD {
        reasons.push(format!(
            "Weak bullish signals ({} points) - insufficient for trade",
            net_score
        ));
        SignalAction::Hold
    } else if net_score <= -WEAK_SCORE_THRESHOLD {
        reasons.push(format!(
            "Weak bearish signals ({} points) - insufficient for trade",
            net_score
        ));
        SignalAction::Hold
    } else {
        reasons.push(format!(
            "Mixed or neutral signals ({} points) - no clear direction",
            net_score
        ));
        SignalAction::Hold
    };

    (direction, strength, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::indicators::{BollingerBands, Macd, Stochastic};
    use crate::exchange::types::Candle;
    use chrono::Utc;

    fn snapshot(
        rsi: f64,
        macd: (f64, f64, f64),
        ema12: f64,
        ema26: f64,
        sma20: f64,
        bands: (f64, f64, f64),
        stoch: (f64, f64),
    ) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi,
            macd: Macd {
                macd: macd.0,
                signal: macd.1,
                histogram: macd.2,
            },
            ema12,
            ema26,
            sma20,
            bollinger_bands: BollingerBands {
                upper: bands.0,
                middle: bands.1,
                lower: bands.2,
            },
            stochastic: Stochastic {
                k: stoch.0,
                d: stoch.1,
            },
        }
    }

    fn flat_candles(count: usize, price: f64) -> Vec<Candle> {
        let now = Utc::now();
        (0..count).map(|_| Candle::flat(price, now, now)).collect()
    }

    #[test]
    fn test_short_window_holds_with_zero_strength() {
        let signal = generate_signal("BTCUSDT", &flat_candles(30, 100.0));
        assert_eq!(signal.direction, SignalAction::Hold);
        assert_eq!(signal.strength, 0.0);
        assert_eq!(signal.indicators, IndicatorSnapshot::neutral());
        assert_eq!(signal.price, 100.0);
        assert_eq!(signal.reasons, vec!["Insufficient candle history for analysis"]);
    }

    #[test]
    fn test_empty_window_holds_at_zero_price() {
        let signal = generate_signal("BTCUSDT", &[]);
        assert_eq!(signal.direction, SignalAction::Hold);
        assert_eq!(signal.price, 0.0);
    }

    #[test]
    fn test_aligned_bullish_extremes_produce_buy() {
        // 25 + 20 + 18 + 12 + 15 + 18 = 108 net.
        let ind = snapshot(
            15.0,
            (0.02, 0.0, 0.02),
            102.0,
            100.0,
            100.0,
            (130.0, 120.0, 110.0),
            (5.0, 5.0),
        );
        let (direction, strength, reasons) = analyze_snapshot(110.0, &ind);
        assert_eq!(direction, SignalAction::Buy);
        assert_eq!(strength, 72.0);
        assert!(reasons
            .iter()
            .any(|r| r == "Very strong bullish consensus (108 points)"));
    }

    #[test]
    fn test_aligned_bearish_extremes_produce_sell() {
        let ind = snapshot(
            85.0,
            (-0.02, 0.0, -0.02),
            98.0,
            100.0,
            100.0,
            (90.0, 80.0, 70.0),
            (95.0, 95.0),
        );
        let (direction, strength, reasons) = analyze_snapshot(90.0, &ind);
        assert_eq!(direction, SignalAction::Sell);
        assert_eq!(strength, 72.0);
        assert!(reasons
            .iter()
            .any(|r| r == "Very strong bearish consensus (-108 points)"));
    }

    #[test]
    fn test_execute_threshold_is_inclusive() {
        // buy 25 + 18 + 18 = 61, sell 1 from the always-on SMA check.
        let ind = snapshot(
            15.0,
            (0.0, 0.0, 0.0),
            102.0,
            100.0,
            100.0,
            (110.0, 100.0, 90.0),
            (5.0, 5.0),
        );
        let (direction, strength, _) = analyze_snapshot(99.5, &ind);
        assert_eq!(direction, SignalAction::Buy);
        assert_eq!(strength, 40.0);
    }

    #[test]
    fn test_moderate_zone_holds_with_graded_reason() {
        // buy 25 + 18 + 1 = 44: decisive evidence but below the bar.
        let ind = snapshot(
            15.0,
            (0.0, 0.0, 0.0),
            102.0,
            100.0,
            100.0,
            (110.0, 100.0, 90.0),
            (50.0, 50.0),
        );
        let (direction, _, reasons) = analyze_snapshot(100.5, &ind);
        assert_eq!(direction, SignalAction::Hold);
        assert!(reasons
            .iter()
            .any(|r| r == "Moderate bullish signals (44 points) - insufficient for trade"));
    }

    #[test]
    fn test_mixed_evidence_holds_as_neutral() {
        // buy 2 + 2 + 1 = 5.
        let ind = snapshot(
            50.0,
            (0.001, 0.0005, 0.0005),
            100.1,
            100.0,
            100.0,
            (105.0, 100.0, 95.0),
            (50.0, 50.0),
        );
        let (direction, strength, reasons) = analyze_snapshot(100.05, &ind);
        assert_eq!(direction, SignalAction::Hold);
        assert!((strength - 5.0 / 150.0 * 100.0).abs() < 1e-12);
        assert!(reasons
            .iter()
            .any(|r| r == "Mixed or neutral signals (5 points) - no clear direction"));
    }

    #[test]
    fn test_collapsed_bands_contribute_nothing() {
        // Zero-width bands make the position NaN; every zone check fails.
        let ind = snapshot(
            50.0,
            (0.0, 0.0, 0.0),
            100.0,
            100.0,
            100.0,
            (100.0, 100.0, 100.0),
            (50.0, 50.0),
        );
        let (direction, _, reasons) = analyze_snapshot(100.0, &ind);
        assert_eq!(direction, SignalAction::Hold);
        assert!(!reasons.iter().any(|r| r.contains("Bollinger")));
    }

    #[test]
    fn test_execution_fields_are_omitted_until_attached() {
        let signal = generate_signal("BTCUSDT", &flat_candles(10, 100.0));
        let bare = serde_json::to_value(&signal).unwrap();
        assert!(bare.get("orderId").is_none());
        assert!(bare.get("executionPrice").is_none());

        let executed = signal.with_execution("12345".into(), 100.5, "EXECUTED".into());
        let json = serde_json::to_value(&executed).unwrap();
        assert_eq!(json["orderId"], "12345");
        assert_eq!(json["executionPrice"], 100.5);
        assert_eq!(json["status"], "EXECUTED");
        assert_eq!(json["direction"], "HOLD");
    }
}
