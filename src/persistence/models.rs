//! Row types mapped with `sqlx::FromRow`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub token_id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WalletRow {
    pub user_id: String,
    pub token: String,
    pub balance: i64,
    pub locked: i64,
}

impl WalletRow {
    pub fn available(&self) -> i64 {
        self.balance - self.locked
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PoolRow {
    pub id: String,
    pub token_a: String,
    pub token_b: String,
    pub reserve_a: i64,
    pub reserve_b: i64,
    pub fee_bps: i64,
    pub total_lp_shares: i64,
    pub lp_holders: String,
    pub volume_24h: i64,
    pub fees_collected: i64,
    pub swap_count: i64,
    pub price_history: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DexOrderRow {
    pub id: String,
    pub owner: String,
    pub pool_id: String,
    pub side: String,
    pub price: f64,
    pub amount: i64,
    pub filled: i64,
    pub locked_remaining: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SwapRow {
    pub id: i64,
    pub user_id: String,
    pub pool_id: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: i64,
    pub amount_out: i64,
    pub fee: i64,
    pub slippage: f64,
    pub price_impact: f64,
    pub trit: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SignalRow {
    pub id: String,
    pub symbol: String,
    pub venue: String,
    pub interval: String,
    pub signal: String,
    pub score: f64,
    pub confidence: f64,
    pub trit: String,
    /// Opaque JSON blob of the per-strategy votes.
    pub strategies: String,
    /// Opaque JSON blob of the risk assessment.
    pub risk: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VenueOrderRow {
    pub id: String,
    pub user_id: String,
    pub venue: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub price: Option<f64>,
    pub quantity: f64,
    pub status: String,
    pub exchange_order_id: Option<String>,
    pub filled_qty: f64,
    pub filled_price: f64,
    pub fee: f64,
    pub source: String,
    pub ai_signal_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AutoConfigRow {
    pub user_id: String,
    pub venue: String,
    pub enabled: bool,
    pub symbols: String,
    pub max_position_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub min_confidence: f64,
    pub max_daily_trades: i64,
    pub daily_trades_used: i64,
    pub consecutive_losses: i64,
    pub max_consecutive_losses: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct VenueKeyRow {
    pub user_id: String,
    pub venue: String,
    pub access_cipher: String,
    pub secret_cipher: String,
    pub iv: String,
    pub tag: String,
    pub permissions: String,
    pub created_at: DateTime<Utc>,
}

/// Deserialization target for the pools.lp_holders JSON column.
pub type LpHolderMap = std::collections::HashMap<String, u64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_available() {
        let row = WalletRow {
            user_id: "u".to_string(),
            token: "CRWN".to_string(),
            balance: 100,
            locked: 30,
        };
        assert_eq!(row.available(), 70);
    }

    #[test]
    fn test_user_row_hides_password_hash() {
        let row = UserRow {
            id: "u".to_string(),
            email: "a@a".to_string(),
            username: "a".to_string(),
            password_hash: "bcrypt-hash".to_string(),
            role: "user".to_string(),
            created_at: Utc::now(),
            last_login: None,
        };
        let rendered = serde_json::to_string(&row).unwrap();
        assert!(!rendered.contains("bcrypt-hash"));
    }
}
