//! Per-principal risk gates consulted before any trade decision is acted on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_drawdown: f64,
    pub max_position_size: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_daily_trades: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown: 0.15,
            max_position_size: 0.10,
            stop_loss_pct: 0.03,
            take_profit_pct: 0.06,
            max_daily_trades: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    DailyLimit,
    Drawdown,
    StopLoss,
    TakeProfit,
}

/// Outcome of one risk check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub allowed: bool,
    pub risks: Vec<RiskFlag>,
    pub max_size: f64,
    pub drawdown: f64,
}

impl RiskAssessment {
    pub fn permissive() -> Self {
        Self {
            allowed: true,
            risks: Vec::new(),
            max_size: 0.0,
            drawdown: 0.0,
        }
    }

    pub fn has(&self, flag: RiskFlag) -> bool {
        self.risks.contains(&flag)
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenPosition {
    entry_price: f64,
    #[allow(dead_code)]
    quantity: f64,
}

/// Tracks peak balance, open positions and the daily trade count for one
/// principal, and gates each analysis against them.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    peak_balance: f64,
    daily_trades: u32,
    positions: HashMap<String, OpenPosition>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            peak_balance: 0.0,
            daily_trades: 0,
            positions: HashMap::new(),
        }
    }

    pub fn assess(&mut self, symbol: &str, price: f64, balance: f64) -> RiskAssessment {
        if balance > self.peak_balance {
            self.peak_balance = balance;
        }
        let drawdown = if self.peak_balance > 0.0 {
            (self.peak_balance - balance) / self.peak_balance
        } else {
            0.0
        };

        let mut risks = Vec::new();
        let mut allowed = true;

        if self.daily_trades >= self.config.max_daily_trades {
            risks.push(RiskFlag::DailyLimit);
            allowed = false;
        }
        if drawdown > self.config.max_drawdown {
            risks.push(RiskFlag::Drawdown);
            allowed = false;
        }

        // Stop / take flags are advisory: the consensus promotes them to a
        // forced sell rather than blocking the decision.
        if let Some(position) = self.positions.get(symbol) {
            if position.entry_price > 0.0 && price > 0.0 {
                let pnl = (price - position.entry_price) / position.entry_price;
                if pnl < -self.config.stop_loss_pct {
                    risks.push(RiskFlag::StopLoss);
                } else if pnl > self.config.take_profit_pct {
                    risks.push(RiskFlag::TakeProfit);
                }
            }
        }

        RiskAssessment {
            allowed,
            risks,
            max_size: balance * self.config.max_position_size,
            drawdown,
        }
    }

    pub fn open_position(&mut self, symbol: &str, entry_price: f64, quantity: f64) {
        self.positions.insert(
            symbol.to_string(),
            OpenPosition {
                entry_price,
                quantity,
            },
        );
    }

    pub fn close_position(&mut self, symbol: &str) {
        self.positions.remove(symbol);
    }

    pub fn record_trade(&mut self) {
        self.daily_trades += 1;
    }

    pub fn reset_daily(&mut self) {
        self.daily_trades = 0;
    }

    pub fn daily_trades(&self) -> u32 {
        self.daily_trades
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_slate_allows() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let a = rm.assess("BTCUSDT", 50_000.0, 10_000.0);
        assert!(a.allowed);
        assert!(a.risks.is_empty());
        assert_eq!(a.max_size, 1_000.0);
        assert_eq!(a.drawdown, 0.0);
    }

    #[test]
    fn test_daily_cap_blocks() {
        let mut rm = RiskManager::new(RiskConfig::default());
        for _ in 0..10 {
            rm.record_trade();
        }
        let a = rm.assess("BTCUSDT", 50_000.0, 10_000.0);
        assert!(!a.allowed);
        assert!(a.has(RiskFlag::DailyLimit));

        rm.reset_daily();
        let a = rm.assess("BTCUSDT", 50_000.0, 10_000.0);
        assert!(a.allowed);
    }

    #[test]
    fn test_drawdown_blocks_past_fifteen_percent() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.assess("BTCUSDT", 50_000.0, 10_000.0);
        // 20% below peak.
        let a = rm.assess("BTCUSDT", 50_000.0, 8_000.0);
        assert!(!a.allowed);
        assert!(a.has(RiskFlag::Drawdown));
        assert!((a.drawdown - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_within_limit_allows() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.assess("BTCUSDT", 50_000.0, 10_000.0);
        let a = rm.assess("BTCUSDT", 50_000.0, 9_000.0);
        assert!(a.allowed);
        assert!(!a.has(RiskFlag::Drawdown));
    }

    #[test]
    fn test_stop_loss_flag() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.open_position("BTCUSDT", 50_000.0, 0.1);
        let a = rm.assess("BTCUSDT", 48_000.0, 10_000.0);
        // Down 4% against a 3% stop: flagged but still allowed.
        assert!(a.allowed);
        assert!(a.has(RiskFlag::StopLoss));
    }

    #[test]
    fn test_take_profit_flag() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.open_position("BTCUSDT", 50_000.0, 0.1);
        let a = rm.assess("BTCUSDT", 54_000.0, 10_000.0);
        assert!(a.has(RiskFlag::TakeProfit));
    }

    #[test]
    fn test_closed_position_stops_flagging() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.open_position("BTCUSDT", 50_000.0, 0.1);
        rm.close_position("BTCUSDT");
        let a = rm.assess("BTCUSDT", 40_000.0, 10_000.0);
        assert!(!a.has(RiskFlag::StopLoss));
    }
}
