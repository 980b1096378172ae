//! Technical indicator math
//!
//! Pure functions over close/high/low series. Every function is total:
//! when the series is shorter than the indicator period it degrades to a
//! neutral or last-value fallback instead of erroring, so callers can
//! always render a snapshot. The composite signal layer separately
//! refuses to trade below `MIN_CANDLES_FOR_ANALYSIS`.

use serde::{Deserialize, Serialize};

use crate::exchange::types::Candle;

pub const RSI_PERIOD: usize = 14;
pub const EMA_FAST_PERIOD: usize = 12;
pub const EMA_SLOW_PERIOD: usize = 26;
pub const MACD_SIGNAL_PERIOD: usize = 9;
pub const SMA_PERIOD: usize = 20;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;
pub const STOCHASTIC_K_PERIOD: usize = 14;
pub const STOCHASTIC_D_PERIOD: usize = 3;

/// Minimum candles required before the composite signal trusts the math.
pub const MIN_CANDLES_FOR_ANALYSIS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

/// One computation pass over a candle window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub macd: Macd,
    pub ema12: f64,
    pub ema26: f64,
    pub sma20: f64,
    pub bollinger_bands: BollingerBands,
    pub stochastic: Stochastic,
}

impl IndicatorSnapshot {
    /// Neutral snapshot used when there is not enough history to analyze.
    pub fn neutral() -> Self {
        Self {
            rsi: 50.0,
            macd: Macd {
                macd: 0.0,
                signal: 0.0,
                histogram: 0.0,
            },
            ema12: 0.0,
            ema26: 0.0,
            sma20: 0.0,
            bollinger_bands: BollingerBands {
                upper: 0.0,
                middle: 0.0,
                lower: 0.0,
            },
            stochastic: Stochastic { k: 50.0, d: 50.0 },
        }
    }

    pub fn from_candles(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        Self {
            rsi: rsi(&closes, RSI_PERIOD),
            macd: macd(&closes),
            ema12: ema(&closes, EMA_FAST_PERIOD),
            ema26: ema(&closes, EMA_SLOW_PERIOD),
            sma20: sma(&closes, SMA_PERIOD),
            bollinger_bands: bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV),
            stochastic: stochastic(
                &highs,
                &lows,
                &closes,
                STOCHASTIC_K_PERIOD,
                STOCHASTIC_D_PERIOD,
            ),
        }
    }
}

/// Wilder RSI: seed averages over the first `period` deltas, then smooth.
/// Returns 50 when the series is too short, 100 when there are no losses.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 50.0;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }

    let period_f = period as f64;
    let mut avg_gain = gains / period_f;
    let mut avg_loss = losses / period_f;

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { change.abs() } else { 0.0 };
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// SMA-seeded exponential average. Returns the last value when the series
/// is shorter than `period`, 0 when empty.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    let last = match prices.last() {
        Some(v) => *v,
        None => return 0.0,
    };
    if prices.len() < period {
        return last;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    for price in &prices[period..] {
        ema = price * multiplier + ema * (1.0 - multiplier);
    }
    ema
}

/// Simple average of the trailing `period` values, last value when short.
pub fn sma(prices: &[f64], period: usize) -> f64 {
    let last = match prices.last() {
        Some(v) => *v,
        None => return 0.0,
    };
    if prices.len() < period {
        return last;
    }
    prices[prices.len() - period..].iter().sum::<f64>() / period as f64
}

/// MACD line with its signal line. The signal is a 9-period EMA over the
/// MACD value recomputed for each close prefix from the slow period on.
pub fn macd(closes: &[f64]) -> Macd {
    let macd_line = ema(closes, EMA_FAST_PERIOD) - ema(closes, EMA_SLOW_PERIOD);

    let mut macd_values = Vec::new();
    for i in EMA_SLOW_PERIOD..=closes.len() {
        let slice = &closes[..i];
        macd_values.push(ema(slice, EMA_FAST_PERIOD) - ema(slice, EMA_SLOW_PERIOD));
    }
    let signal = ema(&macd_values, MACD_SIGNAL_PERIOD);

    Macd {
        macd: macd_line,
        signal,
        histogram: macd_line - signal,
    }
}

/// Bands at `std_dev` population standard deviations around the SMA.
/// All three collapse onto the middle when the series is short.
pub fn bollinger_bands(closes: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = sma(closes, period);
    if closes.len() < period {
        return BollingerBands {
            upper: middle,
            middle,
            lower: middle,
        };
    }

    let recent = &closes[closes.len() - period..];
    let variance = recent.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let standard_deviation = variance.sqrt();

    BollingerBands {
        upper: middle + standard_deviation * std_dev,
        middle,
        lower: middle - standard_deviation * std_dev,
    }
}

/// %K from the trailing `k_period` range plus %D, a `d_period` SMA over
/// the %K series. Flat ranges (zero width) read as neutral 50.
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    d_period: usize,
) -> Stochastic {
    if highs.len() < k_period || closes.is_empty() {
        return Stochastic { k: 50.0, d: 50.0 };
    }

    let recent_highs = &highs[highs.len() - k_period..];
    let recent_lows = &lows[lows.len() - k_period..];
    let current_close = closes[closes.len() - 1];

    let highest_high = recent_highs.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let lowest_low = recent_lows.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let k = (current_close - lowest_low) / (highest_high - lowest_low) * 100.0;

    let mut k_values = Vec::new();
    for i in (k_period - 1)..closes.len() {
        let window_highs = &highs[i + 1 - k_period..=i];
        let window_lows = &lows[i + 1 - k_period..=i];
        let max_high = window_highs.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let min_low = window_lows.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        k_values.push((closes[i] - min_low) / (max_high - min_low) * 100.0);
    }
    let d = sma(&k_values, d_period);

    Stochastic {
        k: if k.is_nan() { 50.0 } else { k },
        d: if d.is_nan() { 50.0 } else { d },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_rsi_neutral_when_short() {
        let closes = vec![100.0; 10];
        assert_eq!(rsi(&closes, RSI_PERIOD), 50.0);
    }

    #[test]
    fn test_rsi_saturates_at_100_without_losses() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, RSI_PERIOD), 100.0);
    }

    #[test]
    fn test_rsi_direction_tracks_the_trend() {
        let up: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64) * 0.7).collect();
        let down: Vec<f64> = (0..40).map(|i| 100.0 - (i as f64) * 0.7).collect();
        assert!(rsi(&up, RSI_PERIOD) > 50.0);
        assert!(rsi(&down, RSI_PERIOD) < 50.0);
    }

    #[test]
    fn test_rsi_stays_bounded_on_random_walks() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let len = rng.gen_range(2..120);
            let mut price = 100.0;
            let closes: Vec<f64> = (0..len)
                .map(|_| {
                    price += rng.gen_range(-5.0..5.0);
                    price
                })
                .collect();
            let value = rsi(&closes, RSI_PERIOD);
            assert!((0.0..=100.0).contains(&value), "rsi out of range: {}", value);
        }
    }

    #[test]
    fn test_ema_known_values() {
        // Seed (1+2+3)/3 = 2, multiplier 0.5: 4 -> 3.0, 5 -> 4.0.
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(ema(&prices, 3), 4.0);
    }

    #[test]
    fn test_ema_falls_back_to_last_value() {
        let prices = vec![10.0, 20.0];
        assert_eq!(ema(&prices, 5), 20.0);
        assert_eq!(ema(&[], 5), 0.0);
    }

    #[test]
    fn test_ema_of_constant_series_is_the_constant() {
        let prices = vec![42.0; 60];
        assert_eq!(ema(&prices, EMA_FAST_PERIOD), 42.0);
    }

    #[test]
    fn test_sma_trailing_window() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&prices, 3), 4.0);
        assert_eq!(sma(&prices, 10), 5.0);
    }

    #[test]
    fn test_macd_of_constant_series_is_zero() {
        let closes = vec![100.0; 60];
        let m = macd(&closes);
        assert_eq!(m.macd, 0.0);
        assert_eq!(m.signal, 0.0);
        assert_eq!(m.histogram, 0.0);
    }

    #[test]
    fn test_macd_positive_in_an_uptrend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let m = macd(&closes);
        assert!(m.macd > 0.0);
        assert!(m.histogram.is_finite());
    }

    #[test]
    fn test_bollinger_exact_bands() {
        // Alternating 9/11: mean 10, population variance 1, sd 1.
        let closes: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 9.0 } else { 11.0 }).collect();
        let bands = bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);
        assert_eq!(bands.middle, 10.0);
        assert_eq!(bands.upper, 12.0);
        assert_eq!(bands.lower, 8.0);
    }

    #[test]
    fn test_bollinger_collapses_when_short() {
        let closes = vec![50.0, 51.0, 52.0];
        let bands = bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);
        assert_eq!(bands.upper, 52.0);
        assert_eq!(bands.middle, 52.0);
        assert_eq!(bands.lower, 52.0);
    }

    #[test]
    fn test_stochastic_extremes() {
        let n = 20;
        let highs: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        let lows: Vec<f64> = (0..n).map(|i| 90.0 + i as f64).collect();

        // Close pinned to the window high.
        let mut closes = lows.clone();
        closes[n - 1] = highs[n - 1];
        let s = stochastic(&highs, &lows, &closes, STOCHASTIC_K_PERIOD, STOCHASTIC_D_PERIOD);
        assert_eq!(s.k, 100.0);

        // Close pinned to the window low.
        let mut closes = highs.clone();
        let lowest = lows[n - STOCHASTIC_K_PERIOD..]
            .iter()
            .fold(f64::INFINITY, |a, &b| a.min(b));
        closes[n - 1] = lowest;
        let s = stochastic(&highs, &lows, &closes, STOCHASTIC_K_PERIOD, STOCHASTIC_D_PERIOD);
        assert_eq!(s.k, 0.0);
    }

    #[test]
    fn test_stochastic_neutral_on_flat_or_short_series() {
        let flat = vec![10.0; 20];
        let s = stochastic(&flat, &flat, &flat, STOCHASTIC_K_PERIOD, STOCHASTIC_D_PERIOD);
        assert_eq!(s.k, 50.0);
        assert_eq!(s.d, 50.0);

        let short = vec![10.0; 5];
        let s = stochastic(&short, &short, &short, STOCHASTIC_K_PERIOD, STOCHASTIC_D_PERIOD);
        assert_eq!(s.k, 50.0);
        assert_eq!(s.d, 50.0);
    }

    #[test]
    fn test_stochastic_stays_bounded_on_random_walks() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let len = rng.gen_range(14..100);
            let mut price: f64 = 100.0;
            let mut highs = Vec::with_capacity(len);
            let mut lows = Vec::with_capacity(len);
            let mut closes = Vec::with_capacity(len);
            for _ in 0..len {
                let open = price;
                price += rng.gen_range(-3.0..3.0);
                let close = price;
                let high = open.max(close) + rng.gen_range(0.0..1.0);
                let low = open.min(close) - rng.gen_range(0.0..1.0);
                highs.push(high);
                lows.push(low);
                closes.push(close);
            }
            let s = stochastic(&highs, &lows, &closes, STOCHASTIC_K_PERIOD, STOCHASTIC_D_PERIOD);
            assert!((0.0..=100.0).contains(&s.k), "%K out of range: {}", s.k);
            assert!((0.0..=100.0).contains(&s.d), "%D out of range: {}", s.d);
        }
    }

    #[test]
    fn test_snapshot_serializes_with_camel_case_keys() {
        let snapshot = IndicatorSnapshot::neutral();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("bollingerBands").is_some());
        assert!(json.get("ema12").is_some());
        assert_eq!(json["rsi"], 50.0);
        assert_eq!(json["stochastic"]["k"], 50.0);
    }
}
