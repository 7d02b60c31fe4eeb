//! Historical replay of the consensus engine.
//!
//! The driver walks the candle series from index 50, re-running the full
//! analysis on each prefix so every decision only sees data that existed at
//! that point. Long-only: a BUY opens a 10%-notional position when flat, a
//! SELL closes it.

use crate::domain::services::consensus::{self, Decision};
use crate::domain::services::indicators::Candle;
use serde::{Deserialize, Serialize};

const WARMUP: usize = 50;
const POSITION_NOTIONAL_PCT: f64 = 0.10;
const ANNUALIZATION: f64 = 252.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_return: f64,
    pub trades: u32,
    pub wins: u32,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
}

pub fn run(candles: &[Candle], initial_balance: f64) -> BacktestReport {
    let mut balance = initial_balance;
    let mut position: Option<(f64, f64)> = None; // (entry price, quantity)
    let mut trades = 0u32;
    let mut wins = 0u32;
    let mut trade_returns: Vec<f64> = Vec::new();
    let mut peak_equity = initial_balance;
    let mut max_drawdown = 0.0f64;

    for i in WARMUP..candles.len() {
        let price = candles[i].close.value();
        if price <= 0.0 {
            continue;
        }
        let decision = consensus::analyze(&candles[..=i]).decision;

        match (decision, position) {
            (Decision::Buy, None) => {
                let notional = balance * POSITION_NOTIONAL_PCT;
                let quantity = notional / price;
                if quantity > 0.0 {
                    balance -= notional;
                    position = Some((price, quantity));
                }
            }
            (Decision::Sell, Some((entry, quantity))) => {
                balance += quantity * price;
                let r = (price - entry) / entry;
                trade_returns.push(r);
                trades += 1;
                if r > 0.0 {
                    wins += 1;
                }
                position = None;
            }
            _ => {}
        }

        let equity = balance + position.map(|(_, q)| q * price).unwrap_or(0.0);
        if equity > peak_equity {
            peak_equity = equity;
        } else if peak_equity > 0.0 {
            max_drawdown = max_drawdown.max((peak_equity - equity) / peak_equity);
        }
    }

    // Liquidate any open position at the final close so the report is
    // comparable across runs.
    if let (Some((entry, quantity)), Some(last)) = (position, candles.last()) {
        balance += quantity * last.close.value();
        let r = (last.close.value() - entry) / entry;
        trade_returns.push(r);
        trades += 1;
        if r > 0.0 {
            wins += 1;
        }
    }

    let total_return = if initial_balance > 0.0 {
        (balance - initial_balance) / initial_balance
    } else {
        0.0
    };
    let win_rate = if trades > 0 {
        wins as f64 / trades as f64
    } else {
        0.0
    };

    BacktestReport {
        initial_balance,
        final_balance: balance,
        total_return,
        trades,
        wins,
        win_rate,
        max_drawdown,
        sharpe: sharpe_ratio(&trade_returns),
    }
}

/// Annualized mean-over-deviation of per-trade returns.
fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std == 0.0 {
        0.0
    } else {
        mean / std * ANNUALIZATION.sqrt()
    }
}
