//! Order execution against external venues.
//!
//! Holds one client per (principal, venue), built lazily from the sealed
//! credentials in the vault and dropped on key rotation. Every order passes
//! the safety gate, is persisted `pending` before the venue sees it, and
//! ends `submitted` or `failed` in the same call.

use crate::application::next_id;
use crate::domain::entities::auto_config::AutoTradeConfig;
use crate::domain::entities::order::OrderSide;
use crate::domain::entities::venue::Venue;
use crate::domain::entities::venue_order::{OrderSource, VenueOrder, VenueOrderStatus};
use crate::domain::errors::PlatformError;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;
use crate::infrastructure::binance_client::BinanceClient;
use crate::infrastructure::key_vault::{KeyVault, SealedKeyPair};
use crate::infrastructure::upbit_client::UpbitClient;
use crate::infrastructure::venue_client::{
    VenueClient, VenueOrderAck, VenueOrderRequest, VenueOrderType,
};
use crate::persistence::{repository, Store};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const MAX_PERSISTED_ERROR_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct ExecuteParams {
    pub user_id: String,
    pub venue: Venue,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: VenueOrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub source: OrderSource,
    pub signal_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub order_id: String,
    pub exchange_order_id: String,
    pub executed_qty: f64,
    pub executed_price: f64,
}

pub struct TradeExecutor {
    store: Store,
    vault: Arc<KeyVault>,
    clients: Mutex<HashMap<(String, Venue), Arc<dyn VenueClient>>>,
}

impl std::fmt::Debug for TradeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeExecutor").finish_non_exhaustive()
    }
}

impl TradeExecutor {
    pub fn new(store: Store, vault: Arc<KeyVault>) -> Self {
        Self {
            store,
            vault,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Drop the cached client for a tuple; the next call rebuilds it from
    /// the current vault contents. Called on key rotation and deletion.
    pub async fn invalidate(&self, user_id: &str, venue: Venue) {
        let removed = self
            .clients
            .lock()
            .await
            .remove(&(user_id.to_string(), venue));
        if removed.is_some() {
            info!(user_id, venue = %venue, "dropped cached venue client");
        }
    }

    /// Fetch or build the authenticated client for a tuple.
    pub async fn client_for(
        &self,
        user_id: &str,
        venue: Venue,
    ) -> Result<Arc<dyn VenueClient>, PlatformError> {
        let key = (user_id.to_string(), venue);
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut conn = self.store.acquire().await?;
        let row = repository::get_venue_key(&mut conn, user_id, venue)
            .await?
            .ok_or_else(|| PlatformError::NotFound("api key".to_string()))?;
        let sealed = SealedKeyPair {
            access_cipher: row.access_cipher,
            secret_cipher: row.secret_cipher,
            iv: row.iv,
            tag: row.tag,
        };
        let (access, secret) = self.vault.open_pair(&sealed)?;

        let client: Arc<dyn VenueClient> = match venue {
            Venue::Upbit => Arc::new(UpbitClient::new(&access, &secret)?),
            Venue::Binance => Arc::new(BinanceClient::new(&access, &secret)?),
        };
        clients.insert(key, client.clone());
        info!(user_id, venue = %venue, "built venue client");
        Ok(client)
    }

    pub async fn cached_client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Reject orders that violate the tuple's auto-trade limits: daily cap,
    /// consecutive-loss breaker, and position notional vs total wallet
    /// balance.
    async fn safety_gate(&self, params: &ExecuteParams) -> Result<(), PlatformError> {
        let mut conn = self.store.acquire().await?;
        let config = repository::get_auto_config(&mut conn, &params.user_id, params.venue)
            .await?
            .unwrap_or_else(|| AutoTradeConfig::defaults(&params.user_id, params.venue));

        if config.daily_cap_reached() {
            return Err(PlatformError::SafetyBlocked(format!(
                "daily trade cap reached ({}/{})",
                config.daily_trades_used, config.max_daily_trades
            )));
        }
        if config.loss_cap_reached() {
            return Err(PlatformError::SafetyBlocked(format!(
                "{} consecutive losses, auto-trading paused",
                config.consecutive_losses
            )));
        }

        let wallet = repository::wallet_rows(&mut conn, &params.user_id).await?;
        let total: i64 = wallet.iter().map(|w| w.balance).sum();
        if total > 0 {
            let notional = params.quantity * params.price.unwrap_or(1.0);
            if notional / total as f64 > config.max_position_pct {
                return Err(PlatformError::SafetyBlocked(format!(
                    "order notional {:.2} exceeds {:.0}% of balance",
                    notional,
                    config.max_position_pct * 100.0
                )));
            }
        }
        Ok(())
    }

    pub async fn execute_order(
        &self,
        params: ExecuteParams,
    ) -> Result<ExecutionResult, PlatformError> {
        let quantity = Quantity::new(params.quantity).map_err(PlatformError::BadInput)?;
        let price = params
            .price
            .map(Price::positive)
            .transpose()
            .map_err(PlatformError::BadInput)?;

        self.safety_gate(&params).await?;

        let order_id = next_id("vo");
        let order = VenueOrder {
            id: order_id.clone(),
            user_id: params.user_id.clone(),
            venue: params.venue,
            symbol: params.symbol.clone(),
            side: params.side.to_string(),
            order_type: match params.order_type {
                VenueOrderType::Market => "market".to_string(),
                VenueOrderType::Limit => "limit".to_string(),
            },
            price: params.price,
            quantity: params.quantity,
            status: VenueOrderStatus::Pending,
            exchange_order_id: None,
            filled_qty: 0.0,
            filled_price: 0.0,
            fee: 0.0,
            source: params.source,
            ai_signal_id: params.signal_id.clone(),
            error: None,
            created_at: Utc::now(),
        };
        {
            let mut conn = self.store.acquire().await?;
            repository::insert_venue_order(&mut conn, &order).await?;
        }

        let client = match self.client_for(&params.user_id, params.venue).await {
            Ok(client) => client,
            Err(e) => {
                self.persist_failure(&order_id, &e).await;
                return Err(e);
            }
        };

        let request = VenueOrderRequest {
            symbol: params.symbol.clone(),
            side: params.side,
            order_type: params.order_type,
            quantity,
            price,
        };
        let ack: VenueOrderAck = match client.place_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                self.persist_failure(&order_id, &e).await;
                warn!(order_id, venue = %params.venue, error = %e, "venue rejected order");
                return Err(e);
            }
        };

        let mut conn = self.store.acquire().await?;
        repository::mark_venue_order_submitted(
            &mut conn,
            &order_id,
            &ack.order_id,
            ack.executed_qty,
            ack.executed_price,
            ack.fee,
        )
        .await?;
        repository::increment_daily_trades(&mut conn, &params.user_id, params.venue).await?;

        info!(
            order_id,
            exchange_order_id = %ack.order_id,
            venue = %params.venue,
            symbol = %params.symbol,
            "order submitted"
        );
        Ok(ExecutionResult {
            order_id,
            exchange_order_id: ack.order_id,
            executed_qty: ack.executed_qty,
            executed_price: ack.executed_price,
        })
    }

    async fn persist_failure(&self, order_id: &str, e: &PlatformError) {
        let mut message = e.to_string();
        if message.len() > MAX_PERSISTED_ERROR_LEN {
            // Venue bodies can be multibyte; cut on a char boundary.
            let mut end = MAX_PERSISTED_ERROR_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        match self.store.acquire().await {
            Ok(mut conn) => {
                if let Err(persist_err) =
                    repository::mark_venue_order_failed(&mut conn, order_id, &message).await
                {
                    error!(order_id, error = %persist_err, "could not persist order failure");
                }
            }
            Err(acquire_err) => {
                error!(order_id, error = %acquire_err, "could not persist order failure");
            }
        }
    }

    /// Feed a realized trade outcome into the consecutive-loss breaker.
    pub async fn record_trade_result(
        &self,
        user_id: &str,
        venue: Venue,
        is_profit: bool,
    ) -> Result<(), PlatformError> {
        let mut conn = self.store.acquire().await?;
        if is_profit {
            repository::reset_consecutive_losses(&mut conn, user_id, venue).await?;
        } else {
            repository::increment_consecutive_losses(&mut conn, user_id, venue).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (Store, Arc<KeyVault>, TradeExecutor) {
        let store = Store::open("sqlite::memory:").await.unwrap();
        let vault = Arc::new(KeyVault::from_key_hex(&"cd".repeat(32)).unwrap());
        let executor = TradeExecutor::new(store.clone(), vault.clone());
        (store, vault, executor)
    }

    fn buy(user_id: &str, qty: f64, price: Option<f64>) -> ExecuteParams {
        ExecuteParams {
            user_id: user_id.to_string(),
            venue: Venue::Binance,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: VenueOrderType::Market,
            quantity: qty,
            price,
            source: OrderSource::Auto,
            signal_id: None,
        }
    }

    #[tokio::test]
    async fn test_missing_keys_fail_and_persist() {
        let (store, _, executor) = setup().await;
        let err = executor.execute_order(buy("u1", 0.1, None)).await.unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));

        // The pending row was flipped to failed, not left dangling.
        let mut conn = store.acquire().await.unwrap();
        let failed = repository::venue_orders_with_status(&mut conn, VenueOrderStatus::Failed)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("api key"));
    }

    #[tokio::test]
    async fn test_daily_cap_blocks_before_any_row() {
        let (store, _, executor) = setup().await;
        let mut config = AutoTradeConfig::defaults("u1", Venue::Binance);
        config.daily_trades_used = 10;
        let mut conn = store.acquire().await.unwrap();
        repository::upsert_auto_config(&mut conn, &config).await.unwrap();
        drop(conn);

        let err = executor.execute_order(buy("u1", 0.1, None)).await.unwrap_err();
        assert!(matches!(err, PlatformError::SafetyBlocked(_)));

        let mut conn = store.acquire().await.unwrap();
        let rows = repository::venue_orders_for_user(&mut conn, "u1", 10).await.unwrap();
        assert!(rows.is_empty(), "a blocked order must not leave a row");
    }

    #[tokio::test]
    async fn test_loss_breaker_blocks() {
        let (store, _, executor) = setup().await;
        let config = AutoTradeConfig::defaults("u1", Venue::Binance);
        let mut conn = store.acquire().await.unwrap();
        repository::upsert_auto_config(&mut conn, &config).await.unwrap();
        for _ in 0..3 {
            repository::increment_consecutive_losses(&mut conn, "u1", Venue::Binance)
                .await
                .unwrap();
        }
        drop(conn);

        let err = executor.execute_order(buy("u1", 0.1, None)).await.unwrap_err();
        match err {
            PlatformError::SafetyBlocked(reason) => assert!(reason.contains("consecutive")),
            other => panic!("expected safety block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_position_cap_blocks_oversized_order() {
        let (store, _, executor) = setup().await;
        let mut conn = store.acquire().await.unwrap();
        repository::add_balance(&mut conn, "u1", "USDT", 1_000).await.unwrap();
        drop(conn);

        // 0.1 BTC at 50k = 5000 notional against 1000 total balance.
        let err = executor
            .execute_order(buy("u1", 0.1, Some(50_000.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::SafetyBlocked(_)));
    }

    #[tokio::test]
    async fn test_empty_wallet_skips_position_cap() {
        let (_, _, executor) = setup().await;
        // Total balance is zero, so only the missing-key error remains.
        let err = executor
            .execute_order(buy("u1", 0.1, Some(50_000.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_trade_result_drives_breaker() {
        let (store, _, executor) = setup().await;
        let config = AutoTradeConfig::defaults("u1", Venue::Upbit);
        let mut conn = store.acquire().await.unwrap();
        repository::upsert_auto_config(&mut conn, &config).await.unwrap();
        drop(conn);

        executor.record_trade_result("u1", Venue::Upbit, false).await.unwrap();
        executor.record_trade_result("u1", Venue::Upbit, false).await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        let loaded = repository::get_auto_config(&mut conn, "u1", Venue::Upbit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.consecutive_losses, 2);
        drop(conn);

        executor.record_trade_result("u1", Venue::Upbit, true).await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        let loaded = repository::get_auto_config(&mut conn, "u1", Venue::Upbit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let (store, vault, executor) = setup().await;
        let sealed = vault.seal_pair("AK_test_access_key", "SK_test_secret_key").unwrap();
        let mut conn = store.acquire().await.unwrap();
        repository::upsert_venue_key(&mut conn, "u1", Venue::Binance, &sealed, "trade")
            .await
            .unwrap();
        drop(conn);

        executor.client_for("u1", Venue::Binance).await.unwrap();
        assert_eq!(executor.cached_client_count().await, 1);

        executor.invalidate("u1", Venue::Binance).await;
        assert_eq!(executor.cached_client_count().await, 0);

        // Rebuild on next request (cache miss after invalidation).
        executor.client_for("u1", Venue::Binance).await.unwrap();
        assert_eq!(executor.cached_client_count().await, 1);
    }
}
