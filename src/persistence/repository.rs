//! Data access functions.
//!
//! Every function takes `&mut SqliteConnection` so it runs equally against
//! a pooled connection or inside a transaction started with
//! [`crate::persistence::Store::begin`]. The gateway composes the swap,
//! liquidity and order paths out of these inside one transaction.

use crate::domain::entities::auto_config::AutoTradeConfig;
use crate::domain::entities::order::{LimitOrder, OrderSide, OrderStatus};
use crate::domain::entities::pool::{Pool, PricePoint, SwapOutcome};
use crate::domain::entities::venue::Venue;
use crate::domain::entities::venue_order::{VenueOrder, VenueOrderStatus};
use crate::domain::errors::PlatformError;
use crate::domain::value_objects::price::Price;
use crate::infrastructure::key_vault::SealedKeyPair;
use crate::persistence::models::*;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::VecDeque;
use std::str::FromStr;

fn conflict_or_store(e: sqlx::Error, what: &str) -> PlatformError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return PlatformError::Conflict(what.to_string());
        }
    }
    PlatformError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// users & sessions

pub async fn insert_user(conn: &mut SqliteConnection, user: &UserRow) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO users (id, email, username, password_hash, role, created_at, last_login) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.username)
    .bind(&user.password_hash)
    .bind(&user.role)
    .bind(user.created_at)
    .bind(user.last_login)
    .execute(conn)
    .await
    .map_err(|e| conflict_or_store(e, "email or username"))?;
    Ok(())
}

pub async fn find_user_by_identity(
    conn: &mut SqliteConnection,
    email_or_username: &str,
) -> Result<Option<UserRow>, PlatformError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT * FROM users WHERE email = ?1 OR username = ?1",
    )
    .bind(email_or_username)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn find_user_by_id(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<UserRow>, PlatformError> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn touch_last_login(
    conn: &mut SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> Result<(), PlatformError> {
    sqlx::query("UPDATE users SET last_login = ?1 WHERE id = ?2")
        .bind(at)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_session(
    conn: &mut SqliteConnection,
    session: &SessionRow,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO sessions (token_id, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&session.token_id)
    .bind(&session.user_id)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_session(
    conn: &mut SqliteConnection,
    token_id: &str,
) -> Result<Option<SessionRow>, PlatformError> {
    let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE token_id = ?1")
        .bind(token_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn delete_session(
    conn: &mut SqliteConnection,
    token_id: &str,
) -> Result<(), PlatformError> {
    sqlx::query("DELETE FROM sessions WHERE token_id = ?1")
        .bind(token_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Remove expired sessions; returns how many were dropped.
pub async fn sweep_sessions(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64, PlatformError> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1")
        .bind(now)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// wallets

pub async fn wallet_rows(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<WalletRow>, PlatformError> {
    let rows = sqlx::query_as::<_, WalletRow>(
        "SELECT * FROM wallets WHERE user_id = ?1 ORDER BY token",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn wallet_balance(
    conn: &mut SqliteConnection,
    user_id: &str,
    token: &str,
) -> Result<WalletRow, PlatformError> {
    let row = sqlx::query_as::<_, WalletRow>(
        "SELECT * FROM wallets WHERE user_id = ?1 AND token = ?2",
    )
    .bind(user_id)
    .bind(token)
    .fetch_optional(conn)
    .await?;
    Ok(row.unwrap_or(WalletRow {
        user_id: user_id.to_string(),
        token: token.to_string(),
        balance: 0,
        locked: 0,
    }))
}

pub async fn add_balance(
    conn: &mut SqliteConnection,
    user_id: &str,
    token: &str,
    amount: u64,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO wallets (user_id, token, balance, locked) VALUES (?1, ?2, ?3, 0) \
         ON CONFLICT(user_id, token) DO UPDATE SET balance = balance + ?3",
    )
    .bind(user_id)
    .bind(token)
    .bind(amount as i64)
    .execute(conn)
    .await?;
    Ok(())
}

/// Debit free balance. Fails when `balance - locked < amount`.
pub async fn subtract_balance(
    conn: &mut SqliteConnection,
    user_id: &str,
    token: &str,
    amount: u64,
) -> Result<(), PlatformError> {
    let result = sqlx::query(
        "UPDATE wallets SET balance = balance - ?3 \
         WHERE user_id = ?1 AND token = ?2 AND balance - locked >= ?3",
    )
    .bind(user_id)
    .bind(token)
    .bind(amount as i64)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let row = wallet_balance(conn, user_id, token).await?;
        return Err(PlatformError::InsufficientBalance {
            token: token.to_string(),
            needed: amount,
            available: row.available().max(0) as u64,
        });
    }
    Ok(())
}

/// Reserve part of the free balance for a resting order.
pub async fn lock_balance(
    conn: &mut SqliteConnection,
    user_id: &str,
    token: &str,
    amount: u64,
) -> Result<(), PlatformError> {
    let result = sqlx::query(
        "UPDATE wallets SET locked = locked + ?3 \
         WHERE user_id = ?1 AND token = ?2 AND balance - locked >= ?3",
    )
    .bind(user_id)
    .bind(token)
    .bind(amount as i64)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let row = wallet_balance(conn, user_id, token).await?;
        return Err(PlatformError::InsufficientBalance {
            token: token.to_string(),
            needed: amount,
            available: row.available().max(0) as u64,
        });
    }
    Ok(())
}

pub async fn unlock_balance(
    conn: &mut SqliteConnection,
    user_id: &str,
    token: &str,
    amount: u64,
) -> Result<(), PlatformError> {
    let result = sqlx::query(
        "UPDATE wallets SET locked = locked - ?3 \
         WHERE user_id = ?1 AND token = ?2 AND locked >= ?3",
    )
    .bind(user_id)
    .bind(token)
    .bind(amount as i64)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PlatformError::Store(format!(
            "unlock of {} {} exceeds locked balance",
            amount, token
        )));
    }
    Ok(())
}

/// Settle a fill: the amount leaves both `locked` and `balance` at once.
pub async fn spend_locked(
    conn: &mut SqliteConnection,
    user_id: &str,
    token: &str,
    amount: u64,
) -> Result<(), PlatformError> {
    let result = sqlx::query(
        "UPDATE wallets SET balance = balance - ?3, locked = locked - ?3 \
         WHERE user_id = ?1 AND token = ?2 AND locked >= ?3",
    )
    .bind(user_id)
    .bind(token)
    .bind(amount as i64)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PlatformError::Store(format!(
            "settlement of {} {} exceeds locked balance",
            amount, token
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pools

pub async fn save_pool(conn: &mut SqliteConnection, pool: &Pool) -> Result<(), PlatformError> {
    let lp_holders = serde_json::to_string(&pool.lp_holders)
        .map_err(|e| PlatformError::Store(e.to_string()))?;
    let price_history = serde_json::to_string(&pool.price_history)
        .map_err(|e| PlatformError::Store(e.to_string()))?;

    sqlx::query(
        "INSERT INTO pools (id, token_a, token_b, reserve_a, reserve_b, fee_bps, \
         total_lp_shares, lp_holders, volume_24h, fees_collected, swap_count, \
         price_history, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
         ON CONFLICT(id) DO UPDATE SET \
         reserve_a = ?4, reserve_b = ?5, total_lp_shares = ?7, lp_holders = ?8, \
         volume_24h = ?9, fees_collected = ?10, swap_count = ?11, \
         price_history = ?12, updated_at = ?13",
    )
    .bind(&pool.id)
    .bind(&pool.token_a)
    .bind(&pool.token_b)
    .bind(pool.reserve_a as i64)
    .bind(pool.reserve_b as i64)
    .bind(pool.fee_bps as i64)
    .bind(pool.total_lp_shares as i64)
    .bind(lp_holders)
    .bind(pool.volume_24h as i64)
    .bind(pool.fees_collected as i64)
    .bind(pool.swap_count as i64)
    .bind(price_history)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn load_pools(conn: &mut SqliteConnection) -> Result<Vec<Pool>, PlatformError> {
    let rows = sqlx::query_as::<_, PoolRow>("SELECT * FROM pools ORDER BY id")
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(pool_from_row).collect()
}

fn pool_from_row(row: PoolRow) -> Result<Pool, PlatformError> {
    let lp_holders: LpHolderMap = serde_json::from_str(&row.lp_holders)
        .map_err(|e| PlatformError::Store(format!("pool {} lp_holders: {}", row.id, e)))?;
    let price_history: VecDeque<PricePoint> = serde_json::from_str(&row.price_history)
        .map_err(|e| PlatformError::Store(format!("pool {} price_history: {}", row.id, e)))?;
    Ok(Pool {
        id: row.id,
        token_a: row.token_a,
        token_b: row.token_b,
        reserve_a: row.reserve_a as u64,
        reserve_b: row.reserve_b as u64,
        fee_bps: row.fee_bps as u32,
        total_lp_shares: row.total_lp_shares as u64,
        lp_holders,
        volume_24h: row.volume_24h as u64,
        fees_collected: row.fees_collected as u64,
        swap_count: row.swap_count as u64,
        price_history,
    })
}

// ---------------------------------------------------------------------------
// dex orders

fn order_side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn order_status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Open => "open",
        OrderStatus::Partial => "partial",
        OrderStatus::Filled => "filled",
        OrderStatus::Cancelled => "cancelled",
    }
}

pub async fn save_dex_order(
    conn: &mut SqliteConnection,
    order: &LimitOrder,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO dex_orders (id, owner, pool_id, side, price, amount, filled, \
         locked_remaining, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(id) DO UPDATE SET \
         filled = ?7, locked_remaining = ?8, status = ?9",
    )
    .bind(&order.id)
    .bind(&order.owner)
    .bind(&order.pool_id)
    .bind(order_side_str(order.side))
    .bind(order.price.value())
    .bind(order.amount as i64)
    .bind(order.filled as i64)
    .bind(order.locked_remaining as i64)
    .bind(order_status_str(order.status))
    .bind(order.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn load_open_dex_orders(
    conn: &mut SqliteConnection,
) -> Result<Vec<LimitOrder>, PlatformError> {
    let rows = sqlx::query_as::<_, DexOrderRow>(
        "SELECT * FROM dex_orders WHERE status IN ('open', 'partial') ORDER BY created_at",
    )
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            let side = match row.side.as_str() {
                "buy" => OrderSide::Buy,
                _ => OrderSide::Sell,
            };
            let status = match row.status.as_str() {
                "open" => OrderStatus::Open,
                "partial" => OrderStatus::Partial,
                "filled" => OrderStatus::Filled,
                _ => OrderStatus::Cancelled,
            };
            Ok(LimitOrder {
                id: row.id,
                owner: row.owner,
                pool_id: row.pool_id,
                side,
                price: Price(row.price),
                amount: row.amount as u64,
                filled: row.filled as u64,
                locked_remaining: row.locked_remaining as u64,
                status,
                created_at: row.created_at,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// swaps

pub async fn insert_swap(
    conn: &mut SqliteConnection,
    user_id: &str,
    pool_id: &str,
    outcome: &SwapOutcome,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO swaps (user_id, pool_id, token_in, token_out, amount_in, amount_out, \
         fee, slippage, price_impact, trit, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )
    .bind(user_id)
    .bind(pool_id)
    .bind(&outcome.token_in)
    .bind(&outcome.token_out)
    .bind(outcome.amount_in as i64)
    .bind(outcome.amount_out as i64)
    .bind(outcome.fee as i64)
    .bind(outcome.slippage)
    .bind(outcome.price_impact)
    .bind(outcome.trit.letter())
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn recent_swaps(
    conn: &mut SqliteConnection,
    limit: u32,
) -> Result<Vec<SwapRow>, PlatformError> {
    let rows = sqlx::query_as::<_, SwapRow>(
        "SELECT * FROM swaps ORDER BY id DESC LIMIT ?1",
    )
    .bind(limit as i64)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// signals

pub async fn insert_signal(
    conn: &mut SqliteConnection,
    signal: &SignalRow,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO ai_signals (id, symbol, venue, interval, signal, score, confidence, \
         trit, strategies, risk, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )
    .bind(&signal.id)
    .bind(&signal.symbol)
    .bind(&signal.venue)
    .bind(&signal.interval)
    .bind(&signal.signal)
    .bind(signal.score)
    .bind(signal.confidence)
    .bind(&signal.trit)
    .bind(&signal.strategies)
    .bind(&signal.risk)
    .bind(signal.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_signal(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<SignalRow>, PlatformError> {
    let row = sqlx::query_as::<_, SignalRow>("SELECT * FROM ai_signals WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

// ---------------------------------------------------------------------------
// venue orders

pub async fn insert_venue_order(
    conn: &mut SqliteConnection,
    order: &VenueOrder,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO venue_orders (id, user_id, venue, symbol, side, order_type, price, \
         quantity, status, exchange_order_id, filled_qty, filled_price, fee, source, \
         ai_signal_id, error, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)",
    )
    .bind(&order.id)
    .bind(&order.user_id)
    .bind(order.venue.name())
    .bind(&order.symbol)
    .bind(&order.side)
    .bind(&order.order_type)
    .bind(order.price)
    .bind(order.quantity)
    .bind(order.status.as_str())
    .bind(&order.exchange_order_id)
    .bind(order.filled_qty)
    .bind(order.filled_price)
    .bind(order.fee)
    .bind(order.source.as_str())
    .bind(&order.ai_signal_id)
    .bind(&order.error)
    .bind(order.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn mark_venue_order_submitted(
    conn: &mut SqliteConnection,
    id: &str,
    exchange_order_id: &str,
    filled_qty: f64,
    filled_price: f64,
    fee: f64,
) -> Result<(), PlatformError> {
    let result = sqlx::query(
        "UPDATE venue_orders SET status = 'submitted', exchange_order_id = ?2, \
         filled_qty = ?3, filled_price = ?4, fee = ?5, updated_at = ?6 \
         WHERE id = ?1 AND status = 'pending'",
    )
    .bind(id)
    .bind(exchange_order_id)
    .bind(filled_qty)
    .bind(filled_price)
    .bind(fee)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(PlatformError::Store(format!(
            "venue order {} not in pending state",
            id
        )));
    }
    Ok(())
}

pub async fn mark_venue_order_failed(
    conn: &mut SqliteConnection,
    id: &str,
    error: &str,
) -> Result<(), PlatformError> {
    let result = sqlx::query(
        "UPDATE venue_orders SET status = 'failed', error = ?2, updated_at = ?3 \
         WHERE id = ?1 AND status = 'pending'",
    )
    .bind(id)
    .bind(error)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(PlatformError::Store(format!(
            "venue order {} not in pending state",
            id
        )));
    }
    Ok(())
}

/// Reconciler transition out of `submitted`.
pub async fn mark_venue_order_final(
    conn: &mut SqliteConnection,
    id: &str,
    status: VenueOrderStatus,
    filled_qty: f64,
    filled_price: f64,
) -> Result<bool, PlatformError> {
    if !VenueOrderStatus::Submitted.can_transition_to(status) {
        return Err(PlatformError::Store(format!(
            "invalid venue order transition to {}",
            status.as_str()
        )));
    }
    let result = sqlx::query(
        "UPDATE venue_orders SET status = ?2, filled_qty = ?3, filled_price = ?4, \
         updated_at = ?5 WHERE id = ?1 AND status = 'submitted'",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(filled_qty)
    .bind(filled_price)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn venue_orders_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: u32,
) -> Result<Vec<VenueOrderRow>, PlatformError> {
    let rows = sqlx::query_as::<_, VenueOrderRow>(
        "SELECT * FROM venue_orders WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
    )
    .bind(user_id)
    .bind(limit as i64)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn find_venue_order_by_exchange_id(
    conn: &mut SqliteConnection,
    user_id: &str,
    exchange_order_id: &str,
) -> Result<Option<VenueOrderRow>, PlatformError> {
    let row = sqlx::query_as::<_, VenueOrderRow>(
        "SELECT * FROM venue_orders WHERE user_id = ?1 AND exchange_order_id = ?2",
    )
    .bind(user_id)
    .bind(exchange_order_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn venue_orders_with_status(
    conn: &mut SqliteConnection,
    status: VenueOrderStatus,
) -> Result<Vec<VenueOrderRow>, PlatformError> {
    let rows = sqlx::query_as::<_, VenueOrderRow>(
        "SELECT * FROM venue_orders WHERE status = ?1 ORDER BY created_at",
    )
    .bind(status.as_str())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// auto-trade configs

pub async fn upsert_auto_config(
    conn: &mut SqliteConnection,
    config: &AutoTradeConfig,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO auto_trade_configs (user_id, venue, enabled, symbols, max_position_pct, \
         stop_loss_pct, take_profit_pct, min_confidence, max_daily_trades, daily_trades_used, \
         consecutive_losses, max_consecutive_losses) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT(user_id, venue) DO UPDATE SET \
         enabled = ?3, symbols = ?4, max_position_pct = ?5, stop_loss_pct = ?6, \
         take_profit_pct = ?7, min_confidence = ?8, max_daily_trades = ?9",
    )
    .bind(&config.user_id)
    .bind(config.venue.name())
    .bind(config.enabled)
    .bind(&config.symbols)
    .bind(config.max_position_pct)
    .bind(config.stop_loss_pct)
    .bind(config.take_profit_pct)
    .bind(config.min_confidence)
    .bind(config.max_daily_trades as i64)
    .bind(config.daily_trades_used as i64)
    .bind(config.consecutive_losses as i64)
    .bind(config.max_consecutive_losses as i64)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_auto_config(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
) -> Result<Option<AutoTradeConfig>, PlatformError> {
    let row = sqlx::query_as::<_, AutoConfigRow>(
        "SELECT * FROM auto_trade_configs WHERE user_id = ?1 AND venue = ?2",
    )
    .bind(user_id)
    .bind(venue.name())
    .fetch_optional(conn)
    .await?;
    row.map(auto_config_from_row).transpose()
}

fn auto_config_from_row(row: AutoConfigRow) -> Result<AutoTradeConfig, PlatformError> {
    Ok(AutoTradeConfig {
        user_id: row.user_id,
        venue: Venue::from_str(&row.venue)?,
        enabled: row.enabled,
        symbols: row.symbols,
        max_position_pct: row.max_position_pct,
        stop_loss_pct: row.stop_loss_pct,
        take_profit_pct: row.take_profit_pct,
        min_confidence: row.min_confidence,
        max_daily_trades: row.max_daily_trades as u32,
        daily_trades_used: row.daily_trades_used as u32,
        consecutive_losses: row.consecutive_losses as u32,
        max_consecutive_losses: row.max_consecutive_losses as u32,
    })
}

pub async fn set_auto_enabled(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
    enabled: bool,
) -> Result<(), PlatformError> {
    sqlx::query(
        "UPDATE auto_trade_configs SET enabled = ?3 WHERE user_id = ?1 AND venue = ?2",
    )
    .bind(user_id)
    .bind(venue.name())
    .bind(enabled)
    .execute(conn)
    .await?;
    Ok(())
}

/// Bump the daily counter, refusing to push it past the cap. Returns
/// whether the increment was applied.
pub async fn increment_daily_trades(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
) -> Result<bool, PlatformError> {
    let result = sqlx::query(
        "UPDATE auto_trade_configs SET daily_trades_used = daily_trades_used + 1 \
         WHERE user_id = ?1 AND venue = ?2 AND daily_trades_used < max_daily_trades",
    )
    .bind(user_id)
    .bind(venue.name())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn increment_consecutive_losses(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
) -> Result<(), PlatformError> {
    sqlx::query(
        "UPDATE auto_trade_configs SET consecutive_losses = consecutive_losses + 1 \
         WHERE user_id = ?1 AND venue = ?2",
    )
    .bind(user_id)
    .bind(venue.name())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn reset_consecutive_losses(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
) -> Result<(), PlatformError> {
    sqlx::query(
        "UPDATE auto_trade_configs SET consecutive_losses = 0 \
         WHERE user_id = ?1 AND venue = ?2",
    )
    .bind(user_id)
    .bind(venue.name())
    .execute(conn)
    .await?;
    Ok(())
}

/// Midnight reset across every config.
pub async fn reset_daily_trades_all(conn: &mut SqliteConnection) -> Result<u64, PlatformError> {
    let result = sqlx::query("UPDATE auto_trade_configs SET daily_trades_used = 0")
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// venue keys

pub async fn upsert_venue_key(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
    sealed: &SealedKeyPair,
    permissions: &str,
) -> Result<(), PlatformError> {
    sqlx::query(
        "INSERT INTO venue_keys (user_id, venue, access_cipher, secret_cipher, iv, tag, \
         permissions, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(user_id, venue) DO UPDATE SET \
         access_cipher = ?3, secret_cipher = ?4, iv = ?5, tag = ?6, permissions = ?7",
    )
    .bind(user_id)
    .bind(venue.name())
    .bind(&sealed.access_cipher)
    .bind(&sealed.secret_cipher)
    .bind(&sealed.iv)
    .bind(&sealed.tag)
    .bind(permissions)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_venue_key(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
) -> Result<Option<VenueKeyRow>, PlatformError> {
    let row = sqlx::query_as::<_, VenueKeyRow>(
        "SELECT * FROM venue_keys WHERE user_id = ?1 AND venue = ?2",
    )
    .bind(user_id)
    .bind(venue.name())
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn delete_venue_key(
    conn: &mut SqliteConnection,
    user_id: &str,
    venue: Venue,
) -> Result<bool, PlatformError> {
    let result = sqlx::query("DELETE FROM venue_keys WHERE user_id = ?1 AND venue = ?2")
        .bind(user_id)
        .bind(venue.name())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
