//! Persistence layer.
//!
//! Single SQLite file (WAL journal, foreign keys on) holding every durable
//! row of the platform: users, sessions, wallets, pools, DEX orders, swaps,
//! AI signals, venue orders, auto-trade configs and sealed venue keys.
//! Migrations are re-runnable and executed at boot.

pub mod models;
pub mod repository;

use crate::domain::errors::PlatformError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub type DbPool = SqlitePool;

/// Owns the connection pool; all queries go through [`repository`].
#[derive(Debug, Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    /// Open (creating if missing) and migrate the database at `database_url`
    /// (e.g. `sqlite://data/crownex.db` or `sqlite::memory:`).
    pub async fn open(database_url: &str) -> Result<Self, PlatformError> {
        info!("Opening store: {}", database_url);

        if let Some(db_path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PlatformError::Store(format!("create data dir: {}", e)))?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // In-memory databases are per-connection; keep the pool at one so
        // every query and test sees the same schema.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        info!("Store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn acquire(
        &self,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>, PlatformError> {
        Ok(self.pool.acquire().await?)
    }

    /// Start the atomic unit used by the swap / liquidity / order paths.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>, PlatformError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn run_migrations(pool: &DbPool) -> Result<(), PlatformError> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            created_at DATETIME NOT NULL,
            last_login DATETIME
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at DATETIME NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS wallets (
            user_id TEXT NOT NULL,
            token TEXT NOT NULL,
            balance INTEGER NOT NULL DEFAULT 0 CHECK(balance >= 0),
            locked INTEGER NOT NULL DEFAULT 0 CHECK(locked >= 0 AND locked <= balance),
            PRIMARY KEY (user_id, token)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS pools (
            id TEXT PRIMARY KEY,
            token_a TEXT NOT NULL,
            token_b TEXT NOT NULL,
            reserve_a INTEGER NOT NULL,
            reserve_b INTEGER NOT NULL,
            fee_bps INTEGER NOT NULL,
            total_lp_shares INTEGER NOT NULL,
            lp_holders TEXT NOT NULL,
            volume_24h INTEGER NOT NULL DEFAULT 0,
            fees_collected INTEGER NOT NULL DEFAULT 0,
            swap_count INTEGER NOT NULL DEFAULT 0,
            price_history TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS dex_orders (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            pool_id TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
            price REAL NOT NULL,
            amount INTEGER NOT NULL,
            filled INTEGER NOT NULL DEFAULT 0,
            locked_remaining INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL CHECK(status IN ('open', 'partial', 'filled', 'cancelled')),
            created_at DATETIME NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS swaps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            pool_id TEXT NOT NULL,
            token_in TEXT NOT NULL,
            token_out TEXT NOT NULL,
            amount_in INTEGER NOT NULL,
            amount_out INTEGER NOT NULL,
            fee INTEGER NOT NULL,
            slippage REAL NOT NULL,
            price_impact REAL NOT NULL,
            trit TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS ai_signals (
            id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            venue TEXT NOT NULL,
            interval TEXT NOT NULL,
            signal TEXT NOT NULL,
            score REAL NOT NULL,
            confidence REAL NOT NULL,
            trit TEXT NOT NULL,
            strategies TEXT NOT NULL,
            risk TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS venue_orders (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            venue TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            order_type TEXT NOT NULL,
            price REAL,
            quantity REAL NOT NULL,
            status TEXT NOT NULL
                CHECK(status IN ('pending', 'submitted', 'filled', 'cancelled', 'failed')),
            exchange_order_id TEXT,
            filled_qty REAL NOT NULL DEFAULT 0,
            filled_price REAL NOT NULL DEFAULT 0,
            fee REAL NOT NULL DEFAULT 0,
            source TEXT NOT NULL CHECK(source IN ('manual', 'auto')),
            ai_signal_id TEXT,
            error TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS auto_trade_configs (
            user_id TEXT NOT NULL,
            venue TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 0,
            symbols TEXT NOT NULL,
            max_position_pct REAL NOT NULL,
            stop_loss_pct REAL NOT NULL,
            take_profit_pct REAL NOT NULL,
            min_confidence REAL NOT NULL,
            max_daily_trades INTEGER NOT NULL,
            daily_trades_used INTEGER NOT NULL DEFAULT 0,
            consecutive_losses INTEGER NOT NULL DEFAULT 0,
            max_consecutive_losses INTEGER NOT NULL DEFAULT 3,
            PRIMARY KEY (user_id, venue)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS venue_keys (
            user_id TEXT NOT NULL,
            venue TEXT NOT NULL,
            access_cipher TEXT NOT NULL,
            secret_cipher TEXT NOT NULL,
            iv TEXT NOT NULL,
            tag TEXT NOT NULL,
            permissions TEXT NOT NULL DEFAULT '',
            created_at DATETIME NOT NULL,
            PRIMARY KEY (user_id, venue)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_dex_orders_pool ON dex_orders(pool_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_swaps_created ON swaps(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_venue_orders_user ON venue_orders(user_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_venue_orders_status ON venue_orders(status)",
        "CREATE INDEX IF NOT EXISTS idx_signals_created ON ai_signals(created_at)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| PlatformError::Store(format!("migration failed: {}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = Store::open("sqlite::memory:").await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_migrations_create_all_tables() {
        let store = Store::open("sqlite::memory:").await.unwrap();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('users', 'sessions', 'wallets', 'pools', 'dex_orders', 'swaps', \
              'ai_signals', 'venue_orders', 'auto_trade_configs', 'venue_keys')",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn test_migrations_are_rerunnable() {
        let store = Store::open("sqlite::memory:").await.unwrap();
        assert!(run_migrations(store.pool()).await.is_ok());
    }
}
