use crate::domain::entities::venue::Venue;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYMBOLS: &str = "BTCUSDT,ETHUSDT";
pub const MAX_CONSECUTIVE_LOSSES: u32 = 3;

/// Per-(principal, venue) auto-trading configuration and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTradeConfig {
    pub user_id: String,
    pub venue: Venue,
    pub enabled: bool,
    /// Comma-separated symbol list traded each cycle.
    pub symbols: String,
    pub max_position_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub min_confidence: f64,
    pub max_daily_trades: u32,
    pub daily_trades_used: u32,
    pub consecutive_losses: u32,
    pub max_consecutive_losses: u32,
}

impl AutoTradeConfig {
    pub fn defaults(user_id: &str, venue: Venue) -> Self {
        Self {
            user_id: user_id.to_string(),
            venue,
            enabled: false,
            symbols: DEFAULT_SYMBOLS.to_string(),
            max_position_pct: 0.1,
            stop_loss_pct: 0.03,
            take_profit_pct: 0.06,
            min_confidence: 0.7,
            max_daily_trades: 10,
            daily_trades_used: 0,
            consecutive_losses: 0,
            max_consecutive_losses: MAX_CONSECUTIVE_LOSSES,
        }
    }

    pub fn symbol_list(&self) -> Vec<String> {
        self.symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn daily_cap_reached(&self) -> bool {
        self.daily_trades_used >= self.max_daily_trades
    }

    pub fn loss_cap_reached(&self) -> bool {
        self.consecutive_losses >= self.max_consecutive_losses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AutoTradeConfig::defaults("u1", Venue::Binance);
        assert!(!cfg.enabled);
        assert_eq!(cfg.symbols, "BTCUSDT,ETHUSDT");
        assert_eq!(cfg.max_position_pct, 0.1);
        assert_eq!(cfg.stop_loss_pct, 0.03);
        assert_eq!(cfg.take_profit_pct, 0.06);
        assert_eq!(cfg.min_confidence, 0.7);
        assert_eq!(cfg.max_daily_trades, 10);
        assert_eq!(cfg.max_consecutive_losses, 3);
    }

    #[test]
    fn test_symbol_list_trims_and_drops_empties() {
        let mut cfg = AutoTradeConfig::defaults("u1", Venue::Binance);
        cfg.symbols = " BTCUSDT , ,ETHUSDT,".to_string();
        assert_eq!(cfg.symbol_list(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_caps() {
        let mut cfg = AutoTradeConfig::defaults("u1", Venue::Upbit);
        assert!(!cfg.daily_cap_reached());
        cfg.daily_trades_used = 10;
        assert!(cfg.daily_cap_reached());

        assert!(!cfg.loss_cap_reached());
        cfg.consecutive_losses = 3;
        assert!(cfg.loss_cap_reached());
    }
}
