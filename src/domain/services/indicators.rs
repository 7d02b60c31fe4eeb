//! Technical indicators over candle series.
//!
//! Every indicator is a pure function returning a vector aligned with its
//! input; positions where the indicator is not yet defined hold `None` and
//! are never substituted with zero.

use crate::domain::value_objects::price::Price;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, String> {
        if !volume.is_finite() || volume < 0.0 {
            return Err("Candle volume must be a non-negative number".to_string());
        }
        Ok(Candle {
            timestamp,
            open: Price::new(open)?,
            high: Price::new(high)?,
            low: Price::new(low)?,
            close: Price::new(close)?,
            volume,
        })
    }
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close.value()).collect()
}

/// Simple moving average, defined from index `period - 1`.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        out[i] = Some(window_sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first window.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut current: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(current);
    for i in period..values.len() {
        current = (values[i] - current) * multiplier + current;
        out[i] = Some(current);
    }
    out
}

/// Relative strength index with Wilder smoothing. The first value appears
/// at index `period`, seeded with the simple average of the first `period`
/// gains and losses.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period + 1 {
        return out;
    }

    let mut gains = Vec::with_capacity(values.len() - 1);
    let mut losses = Vec::with_capacity(values.len() - 1);
    for i in 1..values.len() {
        let change = values[i] - values[i - 1];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;
    out[period] = Some(rsi_point(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
        out[i + 1] = Some(rsi_point(avg_gain, avg_loss));
    }
    out
}

fn rsi_point(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// MACD 12/26 with a 9-period signal line.
pub fn macd(values: &[f64]) -> MacdSeries {
    macd_with(values, 12, 26, 9)
}

pub fn macd_with(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let n = values.len();
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);

    let mut macd_line = vec![None; n];
    for i in 0..n {
        if let (Some(f), Some(s)) = (fast_ema[i], slow_ema[i]) {
            macd_line[i] = Some(f - s);
        }
    }

    // Signal is an EMA over the defined portion of the MACD line.
    let offset = macd_line.iter().position(|v| v.is_some());
    let mut signal = vec![None; n];
    if let Some(offset) = offset {
        let compact: Vec<f64> = macd_line[offset..].iter().map(|v| v.unwrap()).collect();
        for (j, v) in ema(&compact, signal_period).into_iter().enumerate() {
            signal[offset + j] = v;
        }
    }

    let mut histogram = vec![None; n];
    for i in 0..n {
        if let (Some(m), Some(s)) = (macd_line[i], signal[i]) {
            histogram[i] = Some(m - s);
        }
    }

    MacdSeries {
        macd: macd_line,
        signal,
        histogram,
    }
}

#[derive(Debug, Clone)]
pub struct BollingerSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Bollinger bands: SMA +/- `mult` population standard deviations.
pub fn bollinger(values: &[f64], period: usize, mult: f64) -> BollingerSeries {
    let n = values.len();
    let middle = sma(values, period);
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];

    for i in 0..n {
        if let Some(mean) = middle[i] {
            let window = &values[i + 1 - period..=i];
            let variance =
                window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
            let std = variance.sqrt();
            upper[i] = Some(mean + mult * std);
            lower[i] = Some(mean - mult * std);
        }
    }

    BollingerSeries {
        upper,
        middle,
        lower,
    }
}

#[derive(Debug, Clone)]
pub struct StochasticSeries {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

/// Stochastic oscillator: %K over `k_period`, %D = SMA of %K over `d_period`.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> StochasticSeries {
    let n = candles.len();
    let mut k = vec![None; n];
    if k_period == 0 || n < k_period {
        return StochasticSeries { k, d: vec![None; n] };
    }

    for i in (k_period - 1)..n {
        let window = &candles[i + 1 - k_period..=i];
        let highest = window
            .iter()
            .map(|c| c.high.value())
            .fold(f64::NEG_INFINITY, f64::max);
        let lowest = window
            .iter()
            .map(|c| c.low.value())
            .fold(f64::INFINITY, f64::min);
        let range = highest - lowest;
        k[i] = Some(if range == 0.0 {
            50.0
        } else {
            100.0 * (candles[i].close.value() - lowest) / range
        });
    }

    let offset = k_period - 1;
    let compact: Vec<f64> = k[offset..].iter().map(|v| v.unwrap()).collect();
    let mut d = vec![None; n];
    for (j, v) in sma(&compact, d_period).into_iter().enumerate() {
        d[offset + j] = v;
    }

    StochasticSeries { k, d }
}

/// Average true range with Wilder smoothing. Defined from index `period`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let n = candles.len();
    let mut out = vec![None; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let c = &candles[i];
        let prev_close = candles[i - 1].close.value();
        let tr = (c.high.value() - c.low.value())
            .max((c.high.value() - prev_close).abs())
            .max((c.low.value() - prev_close).abs());
        true_ranges.push(tr);
    }

    let mut current: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period] = Some(current);
    for i in period..true_ranges.len() {
        current = (current * (period as f64 - 1.0) + true_ranges[i]) / period as f64;
        out[i + 1] = Some(current);
    }
    out
}

/// Volume-weighted average price, cumulative over the series.
pub fn vwap(candles: &[Candle]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(candles.len());
    let mut cum_volume = 0.0;
    let mut cum_pv = 0.0;
    for c in candles {
        let typical = (c.high.value() + c.low.value() + c.close.value()) / 3.0;
        cum_volume += c.volume;
        cum_pv += typical * c.volume;
        out.push(if cum_volume > 0.0 {
            Some(cum_pv / cum_volume)
        } else {
            None
        });
    }
    out
}

/// On-balance volume, cumulative from zero.
pub fn obv(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    let mut running = 0.0;
    for (i, c) in candles.iter().enumerate() {
        if i > 0 {
            if c.close > candles[i - 1].close {
                running += c.volume;
            } else if c.close < candles[i - 1].close {
                running -= c.volume;
            }
        }
        out.push(running);
    }
    out
}
