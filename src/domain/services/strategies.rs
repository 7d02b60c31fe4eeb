//! Trading strategies.
//!
//! Each strategy is a stateless read of a candle series producing a ternary
//! signal (+1 buy, 0 hold, -1 sell), a confidence in [0, 1] and a short
//! human-readable reason. A confidence of exactly zero means the strategy
//! has nothing to say (usually not enough candles) and is dropped from the
//! consensus.

use crate::domain::services::indicators::{self, Candle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    pub signal: i8,
    pub confidence: f64,
    pub reason: String,
}

impl StrategySignal {
    fn silent(reason: &str) -> Self {
        Self {
            signal: 0,
            confidence: 0.0,
            reason: reason.to_string(),
        }
    }

    fn vote(signal: i8, confidence: f64, reason: String) -> Self {
        Self {
            signal,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
        }
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn weight(&self) -> f64;
    fn evaluate(&self, candles: &[Candle]) -> StrategySignal;
}

/// The production strategy set with its voting weights.
pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(RsiStrategy),
        Box::new(MacdStrategy),
        Box::new(BollingerStrategy),
        Box::new(VolumeStrategy),
        Box::new(TrendStrategy),
        Box::new(StochasticStrategy),
    ]
}

/// RSI oversold/overbought reversal.
pub struct RsiStrategy;

impl Strategy for RsiStrategy {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn weight(&self) -> f64 {
        1.5
    }

    fn evaluate(&self, candles: &[Candle]) -> StrategySignal {
        let closes = indicators::closes(candles);
        let Some(rsi) = indicators::rsi(&closes, 14).last().copied().flatten() else {
            return StrategySignal::silent("not enough candles for RSI(14)");
        };

        if rsi < 30.0 {
            let confidence = 0.6 + (30.0 - rsi) / 30.0 * 0.4;
            StrategySignal::vote(1, confidence, format!("RSI {:.1} oversold", rsi))
        } else if rsi > 70.0 {
            let confidence = 0.6 + (rsi - 70.0) / 30.0 * 0.4;
            StrategySignal::vote(-1, confidence, format!("RSI {:.1} overbought", rsi))
        } else {
            StrategySignal::vote(0, 0.3, format!("RSI {:.1} neutral", rsi))
        }
    }
}

/// MACD line vs signal line crossings.
pub struct MacdStrategy;

impl Strategy for MacdStrategy {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn weight(&self) -> f64 {
        1.3
    }

    fn evaluate(&self, candles: &[Candle]) -> StrategySignal {
        let closes = indicators::closes(candles);
        let series = indicators::macd(&closes);
        let n = closes.len();
        if n < 2 {
            return StrategySignal::silent("not enough candles for MACD");
        }
        let (Some(macd_now), Some(sig_now)) = (series.macd[n - 1], series.signal[n - 1]) else {
            return StrategySignal::silent("not enough candles for MACD");
        };
        let (prev_macd, prev_sig) = (series.macd[n - 2], series.signal[n - 2]);

        let crossed_up = matches!((prev_macd, prev_sig), (Some(m), Some(s)) if m <= s)
            && macd_now > sig_now;
        let crossed_down = matches!((prev_macd, prev_sig), (Some(m), Some(s)) if m >= s)
            && macd_now < sig_now;

        if crossed_up {
            StrategySignal::vote(1, 0.8, "MACD golden cross".to_string())
        } else if crossed_down {
            StrategySignal::vote(-1, 0.8, "MACD dead cross".to_string())
        } else if macd_now > sig_now {
            StrategySignal::vote(1, 0.5, "MACD above signal".to_string())
        } else if macd_now < sig_now {
            StrategySignal::vote(-1, 0.5, "MACD below signal".to_string())
        } else {
            StrategySignal::vote(0, 0.3, "MACD flat".to_string())
        }
    }
}

/// Mean reversion on Bollinger band touches.
pub struct BollingerStrategy;

impl Strategy for BollingerStrategy {
    fn name(&self) -> &'static str {
        "bollinger"
    }

    fn weight(&self) -> f64 {
        1.2
    }

    fn evaluate(&self, candles: &[Candle]) -> StrategySignal {
        let closes = indicators::closes(candles);
        let series = indicators::bollinger(&closes, 20, 2.0);
        let n = closes.len();
        let (Some(upper), Some(lower)) = (
            series.upper.last().copied().flatten(),
            series.lower.last().copied().flatten(),
        ) else {
            return StrategySignal::silent("not enough candles for Bollinger(20)");
        };

        let close = closes[n - 1];
        let width = upper - lower;
        if width <= 0.0 {
            return StrategySignal::vote(0, 0.3, "bands collapsed".to_string());
        }
        // Position of the close inside the band, 0 = lower, 1 = upper.
        let position = (close - lower) / width;

        if position <= 0.05 {
            StrategySignal::vote(1, 0.85, format!("close {:.4} at lower band", close))
        } else if position >= 0.95 {
            StrategySignal::vote(-1, 0.85, format!("close {:.4} at upper band", close))
        } else if position < 0.2 {
            StrategySignal::vote(1, 0.5, "close near lower band".to_string())
        } else if position > 0.8 {
            StrategySignal::vote(-1, 0.5, "close near upper band".to_string())
        } else {
            StrategySignal::vote(0, 0.3, "close inside bands".to_string())
        }
    }
}

/// Volume expansion confirming the bar's direction.
pub struct VolumeStrategy;

impl Strategy for VolumeStrategy {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn weight(&self) -> f64 {
        0.8
    }

    fn evaluate(&self, candles: &[Candle]) -> StrategySignal {
        let n = candles.len();
        if n < 21 {
            return StrategySignal::silent("not enough candles for volume baseline");
        }
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let Some(mean) = indicators::sma(&volumes[..n - 1], 20).last().copied().flatten() else {
            return StrategySignal::silent("not enough candles for volume baseline");
        };
        if mean <= 0.0 {
            return StrategySignal::vote(0, 0.2, "no baseline volume".to_string());
        }

        let ratio = volumes[n - 1] / mean;
        let direction = if candles[n - 1].close > candles[n - 2].close {
            1
        } else if candles[n - 1].close < candles[n - 2].close {
            -1
        } else {
            0
        };

        if direction == 0 || ratio < 1.5 {
            StrategySignal::vote(0, 0.2, format!("volume ratio {:.2} unremarkable", ratio))
        } else if ratio >= 2.0 {
            StrategySignal::vote(
                direction,
                0.8,
                format!("volume surge {:.1}x with price move", ratio),
            )
        } else {
            StrategySignal::vote(
                direction,
                0.6,
                format!("volume elevated {:.1}x with price move", ratio),
            )
        }
    }
}

/// EMA stack ordering (5 over 20 over 60).
pub struct TrendStrategy;

impl Strategy for TrendStrategy {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn evaluate(&self, candles: &[Candle]) -> StrategySignal {
        let closes = indicators::closes(candles);
        let e5 = indicators::ema(&closes, 5).last().copied().flatten();
        let e20 = indicators::ema(&closes, 20).last().copied().flatten();
        let e60 = indicators::ema(&closes, 60).last().copied().flatten();
        let (Some(e5), Some(e20), Some(e60)) = (e5, e20, e60) else {
            return StrategySignal::silent("not enough candles for EMA stack");
        };

        if e5 > e20 && e20 > e60 {
            StrategySignal::vote(1, 0.75, "EMA stack aligned up".to_string())
        } else if e5 < e20 && e20 < e60 {
            StrategySignal::vote(-1, 0.75, "EMA stack aligned down".to_string())
        } else {
            StrategySignal::vote(0, 0.3, "EMA stack mixed".to_string())
        }
    }
}

/// Stochastic %K/%D crossings in the extreme zones.
pub struct StochasticStrategy;

impl Strategy for StochasticStrategy {
    fn name(&self) -> &'static str {
        "stochastic"
    }

    fn weight(&self) -> f64 {
        0.7
    }

    fn evaluate(&self, candles: &[Candle]) -> StrategySignal {
        let series = indicators::stochastic(candles, 14, 3);
        let (Some(k), Some(d)) = (
            series.k.last().copied().flatten(),
            series.d.last().copied().flatten(),
        ) else {
            return StrategySignal::silent("not enough candles for stochastic");
        };

        if k < 20.0 && k > d {
            StrategySignal::vote(1, 0.7, format!("%K {:.1} turning up from oversold", k))
        } else if k > 80.0 && k < d {
            StrategySignal::vote(-1, 0.7, format!("%K {:.1} turning down from overbought", k))
        } else if k < 20.0 {
            StrategySignal::vote(1, 0.5, format!("%K {:.1} oversold", k))
        } else if k > 80.0 {
            StrategySignal::vote(-1, 0.5, format!("%K {:.1} overbought", k))
        } else {
            StrategySignal::vote(0, 0.25, format!("%K {:.1} mid-range", k))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Candle::new(i as i64, c, c * 1.01, c * 0.99, c, 1000.0).unwrap()
            })
            .collect()
    }

    fn downtrend(n: usize) -> Vec<Candle> {
        let closes: Vec<f64> = (0..n).map(|i| 200.0 - i as f64).collect();
        candles_from_closes(&closes)
    }

    fn uptrend(n: usize) -> Vec<Candle> {
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        candles_from_closes(&closes)
    }

    #[test]
    fn test_short_series_goes_silent() {
        let candles = uptrend(5);
        for strategy in default_strategies() {
            let s = strategy.evaluate(&candles);
            assert_eq!(s.confidence, 0.0, "{} should be silent", strategy.name());
            assert_eq!(s.signal, 0);
        }
    }

    #[test]
    fn test_rsi_sell_in_pure_uptrend() {
        let candles = uptrend(40);
        let s = RsiStrategy.evaluate(&candles);
        // Monotonic rise pins RSI at 100 which reads as overbought.
        assert_eq!(s.signal, -1);
        assert!(s.confidence >= 0.9);
    }

    #[test]
    fn test_rsi_buy_in_pure_downtrend() {
        let candles = downtrend(40);
        let s = RsiStrategy.evaluate(&candles);
        assert_eq!(s.signal, 1);
    }

    #[test]
    fn test_trend_strategy_follows_stack() {
        let up = TrendStrategy.evaluate(&uptrend(80));
        assert_eq!(up.signal, 1);
        let down = TrendStrategy.evaluate(&downtrend(80));
        assert_eq!(down.signal, -1);
    }

    #[test]
    fn test_macd_in_uptrend_leans_buy() {
        let s = MacdStrategy.evaluate(&uptrend(80));
        assert_eq!(s.signal, 1);
        assert!(s.confidence > 0.0);
    }

    #[test]
    fn test_volume_surge_confirms_direction() {
        let mut candles = uptrend(40);
        let last = candles.len() - 1;
        candles[last].volume = 5000.0;
        let s = VolumeStrategy.evaluate(&candles);
        assert_eq!(s.signal, 1);
        assert_eq!(s.confidence, 0.8);
    }

    #[test]
    fn test_volume_quiet_market_holds() {
        let candles = uptrend(40);
        let s = VolumeStrategy.evaluate(&candles);
        assert_eq!(s.signal, 0);
    }

    #[test]
    fn test_stochastic_extremes() {
        let s = StochasticStrategy.evaluate(&downtrend(40));
        assert_eq!(s.signal, 1);
        let s = StochasticStrategy.evaluate(&uptrend(40));
        assert_eq!(s.signal, -1);
    }

    #[test]
    fn test_weights_match_strategy_set() {
        let weights: Vec<f64> = default_strategies().iter().map(|s| s.weight()).collect();
        assert_eq!(weights, vec![1.5, 1.3, 1.2, 0.8, 1.0, 0.7]);
    }
}
