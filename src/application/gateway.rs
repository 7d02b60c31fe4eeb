//! The gateway: single entry for every authenticated operation.
//!
//! Owns all process-wide state (token registry, pools, order book, event
//! ring, rate buckets, risk managers, venue client caches) so nothing lives
//! in ambient singletons. DEX mutations are staged on clones and only
//! written back once the store transaction commits, keeping memory and disk
//! in step.

use crate::application::events::{kinds, EventBus};
use crate::application::executor::{ExecuteParams, TradeExecutor};
use crate::application::next_id;
use crate::domain::entities::order::{LimitOrder, OrderSide};
use crate::domain::entities::pool::Pool;
use crate::domain::entities::principal::Principal;
use crate::domain::entities::token::TokenRegistry;
use crate::domain::entities::venue::Venue;
use crate::domain::entities::venue_order::OrderSource;
use crate::domain::errors::PlatformError;
use crate::domain::services::order_book::OrderBook;
use crate::domain::services::risk::{RiskConfig, RiskManager};
use crate::domain::services::{backtest, consensus};
use crate::infrastructure::binance_client::BinanceClient;
use crate::infrastructure::key_vault::{KeyVault, SealedKeyPair};
use crate::infrastructure::upbit_client::UpbitClient;
use crate::infrastructure::venue_client::{VenueClient, VenueOrderType};
use crate::persistence::models::SignalRow;
use crate::persistence::{repository, Store};
use crate::rate_limit::RateGate;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Assumed KRW/USDT rate for the kimchi premium readout.
const ASSUMED_FX_KRW_PER_USDT: f64 = 1300.0;
const MIN_CANDLES_FOR_ANALYSIS: usize = 50;
const DEFAULT_ANALYSIS_BALANCE: f64 = 10_000.0;

/// Starting wallet granted to every new account.
pub const STARTING_BALANCES: [(&str, u64); 5] = [
    ("CRWN", 1_000_000),
    ("USDT", 500_000),
    ("ETH", 100),
    ("BTC", 5),
    ("KRW", 100_000_000),
];

/// System-owned bootstrap liquidity per pool: (a, b, fee_bps).
const POOL_SEEDS: [(&str, &str, u64, u64, u32); 6] = [
    ("CRWN", "USDT", 10_000_000, 1_250_000, 30),
    ("CRWN", "ETH", 10_000_000, 500, 30),
    ("CRWN", "BTC", 10_000_000, 25, 30),
    ("CRWN", "KRW", 10_000_000, 1_625_000_000, 20),
    ("BTC", "USDT", 100, 5_000_000, 10),
    ("ETH", "USDT", 1_000, 2_500_000, 15),
];

pub(crate) struct DexState {
    pub registry: TokenRegistry,
    pub pools: HashMap<String, Pool>,
    pub book: OrderBook,
}

/// A running auto-trade task for one (principal, venue) tuple.
pub(crate) struct AutoTraderHandle {
    pub task: tokio::task::JoinHandle<()>,
}

pub struct Gateway {
    pub(crate) store: Store,
    pub(crate) vault: Arc<KeyVault>,
    pub executor: Arc<TradeExecutor>,
    pub events: Arc<EventBus>,
    pub(crate) rate: RateGate,
    pub(crate) dex: Mutex<DexState>,
    pub(crate) risk: Mutex<HashMap<String, RiskManager>>,
    pub(crate) market_clients: Mutex<HashMap<Venue, Arc<dyn VenueClient>>>,
    pub(crate) auto_traders: Mutex<HashMap<(String, Venue), AutoTraderHandle>>,
    started_at: DateTime<Utc>,
}

impl Gateway {
    /// Build the gateway: fixed token registry, pools loaded from the store
    /// (seeded with system liquidity on first boot), open orders rehydrated
    /// into the book.
    pub async fn bootstrap(store: Store, vault: Arc<KeyVault>) -> Result<Arc<Self>, PlatformError> {
        let registry = TokenRegistry::bootstrap();

        let mut conn = store.acquire().await?;
        let mut pools: HashMap<String, Pool> = repository::load_pools(&mut conn)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        if pools.is_empty() {
            for (a, b, reserve_a, reserve_b, fee_bps) in POOL_SEEDS {
                let mut pool = Pool::new(a, b, fee_bps);
                pool.add_liquidity("system", reserve_a, reserve_b)?;
                repository::save_pool(&mut conn, &pool).await?;
                pools.insert(pool.id.clone(), pool);
            }
            info!("seeded {} pools with system liquidity", pools.len());
        }

        let mut book = OrderBook::new();
        for order in repository::load_open_dex_orders(&mut conn).await? {
            book.place(order);
        }
        drop(conn);

        let events = Arc::new(EventBus::new());
        let executor = Arc::new(TradeExecutor::new(store.clone(), vault.clone()));

        Ok(Arc::new(Self {
            store,
            vault,
            executor,
            events,
            rate: RateGate::default(),
            dex: Mutex::new(DexState {
                registry,
                pools,
                book,
            }),
            risk: Mutex::new(HashMap::new()),
            market_clients: Mutex::new(HashMap::new()),
            auto_traders: Mutex::new(HashMap::new()),
            started_at: Utc::now(),
        }))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Credential-free client for public market data.
    pub async fn market_client(&self, venue: Venue) -> Result<Arc<dyn VenueClient>, PlatformError> {
        let mut clients = self.market_clients.lock().await;
        if let Some(client) = clients.get(&venue) {
            return Ok(client.clone());
        }
        let client: Arc<dyn VenueClient> = match venue {
            Venue::Upbit => Arc::new(UpbitClient::new("", "")?),
            Venue::Binance => Arc::new(BinanceClient::new("", "")?),
        };
        clients.insert(venue, client.clone());
        Ok(client)
    }

    // -----------------------------------------------------------------------
    // routing

    /// Single entry: rate-limit the principal, then dispatch.
    pub async fn route(
        self: &Arc<Self>,
        service: &str,
        action: &str,
        params: Value,
        principal: Option<&Principal>,
    ) -> Result<Value, PlatformError> {
        if let Some(p) = principal {
            self.rate.check(&p.id)?;
        }

        let result = match (service, action) {
            ("dex", "swap") => {
                let p = require(principal)?;
                self.dex_swap(
                    p,
                    &param_str(&params, "poolId")?,
                    &param_str(&params, "tokenIn")?,
                    param_u64(&params, "amount")?,
                )
                .await?
            }
            ("dex", "addLiquidity") => {
                let p = require(principal)?;
                self.dex_add_liquidity(
                    p,
                    &param_str(&params, "poolId")?,
                    param_u64(&params, "amountA")?,
                    param_u64(&params, "amountB")?,
                )
                .await?
            }
            ("dex", "removeLiquidity") => {
                let p = require(principal)?;
                self.dex_remove_liquidity(
                    p,
                    &param_str(&params, "poolId")?,
                    param_u64(&params, "shares")?,
                )
                .await?
            }
            ("dex", "placeOrder") => {
                let p = require(principal)?;
                self.dex_place_order(
                    p,
                    &param_str(&params, "poolId")?,
                    parse_side(&param_str(&params, "side")?)?,
                    param_f64(&params, "price")?,
                    param_u64(&params, "amount")?,
                )
                .await?
            }
            ("dex", "cancelOrder") => {
                let p = require(principal)?;
                self.dex_cancel_order(p, &param_str(&params, "orderId")?).await?
            }
            ("dex", "summary") => self.dex_summary().await,
            ("dex", "pools") => self.dex_pools().await,
            ("dex", "tokens") => self.dex_tokens().await,
            ("dex", "orderbook") => self.dex_orderbook(&param_str(&params, "pool")?).await,
            ("dex", "history") => self.dex_history(param_u32_or(&params, "limit", 50)).await?,
            ("dex", "balances") => {
                let p = require(principal)?;
                self.dex_balances(p).await?
            }
            ("ai", "analyze") => {
                self.ai_analyze(
                    parse_venue_or(&params, Venue::Binance)?,
                    &param_str_or(&params, "symbol", "BTCUSDT"),
                    &param_str_or(&params, "interval", "1h"),
                    principal,
                )
                .await?
            }
            ("ai", "backtest") => {
                self.ai_backtest(
                    parse_venue_or(&params, Venue::Binance)?,
                    &param_str_or(&params, "symbol", "BTCUSDT"),
                    &param_str_or(&params, "interval", "1h"),
                    param_u32_or(&params, "count", 200),
                )
                .await?
            }
            ("ai", "multiAnalyze") => {
                self.ai_multi_analyze(
                    parse_venue_or(&params, Venue::Binance)?,
                    &param_str_or(&params, "symbols", "BTCUSDT,ETHUSDT"),
                    principal,
                )
                .await?
            }
            ("exchange", "placeOrder") => {
                let p = require(principal)?;
                self.exchange_place_order(p, &params).await?
            }
            ("exchange", "cancelOrder") => {
                let p = require(principal)?;
                self.exchange_cancel_order(
                    p,
                    parse_venue(&params)?,
                    &param_str(&params, "orderId")?,
                    &param_str_or(&params, "symbol", ""),
                )
                .await?
            }
            ("exchange", "balance") => {
                let p = require(principal)?;
                self.exchange_balance(p, parse_venue(&params)?).await?
            }
            ("exchange", "openOrders") => {
                let p = require(principal)?;
                self.exchange_open_orders(
                    p,
                    parse_venue(&params)?,
                    &param_str_or(&params, "symbol", "BTCUSDT"),
                )
                .await?
            }
            ("exchange", "history") => {
                let p = require(principal)?;
                self.exchange_history(p, param_u32_or(&params, "limit", 50)).await?
            }
            ("auto", "enable") => {
                let p = require(principal)?;
                self.auto_enable(p, parse_venue(&params)?, params.get("config")).await?
            }
            ("auto", "disable") => {
                let p = require(principal)?;
                self.auto_disable(p, parse_venue(&params)?).await?
            }
            ("auto", "status") => {
                let p = require(principal)?;
                self.auto_status(p).await?
            }
            ("auto", "saveApiKeys") => {
                let p = require(principal)?;
                self.keys_save(
                    p,
                    parse_venue(&params)?,
                    &param_str(&params, "accessKey")?,
                    &param_str(&params, "secretKey")?,
                )
                .await?
            }
            ("auto", "getApiKeys") => {
                let p = require(principal)?;
                self.keys_get(p, parse_venue(&params)?).await?
            }
            ("auto", "deleteApiKeys") => {
                let p = require(principal)?;
                self.keys_delete(p, parse_venue(&params)?).await?
            }
            (service, action) => {
                return Err(PlatformError::BadInput(format!(
                    "unknown action {}.{}",
                    service, action
                )))
            }
        };

        Ok(envelope(result))
    }

    // -----------------------------------------------------------------------
    // DEX operations

    pub async fn dex_swap(
        &self,
        principal: &Principal,
        pool_id: &str,
        token_in: &str,
        amount: u64,
    ) -> Result<Value, PlatformError> {
        let mut dex = self.dex.lock().await;
        if !dex.registry.contains(token_in) {
            return Err(PlatformError::BadInput(format!("unknown token {}", token_in)));
        }
        let pool = dex
            .pools
            .get(pool_id)
            .ok_or_else(|| PlatformError::NotFound(format!("pool {}", pool_id)))?;

        // Stage on a clone; memory only moves once the transaction commits.
        let mut staged = pool.clone();
        let outcome = staged.swap(token_in, amount)?;

        let mut tx = self.store.begin().await?;
        repository::subtract_balance(&mut tx, &principal.id, token_in, amount).await?;
        repository::add_balance(&mut tx, &principal.id, &outcome.token_out, outcome.amount_out)
            .await?;
        repository::insert_swap(&mut tx, &principal.id, pool_id, &outcome).await?;
        repository::save_pool(&mut tx, &staged).await?;
        tx.commit().await?;

        dex.pools.insert(pool_id.to_string(), staged.clone());
        drop(dex);

        let result = json!({
            "poolId": pool_id,
            "tokenIn": outcome.token_in,
            "tokenOut": outcome.token_out,
            "amountIn": outcome.amount_in,
            "amountOut": outcome.amount_out,
            "fee": outcome.fee,
            "priceImpact": outcome.price_impact,
            "slippage": outcome.slippage,
            "trit": outcome.trit.letter(),
            "price": staged.price_a_in_b(),
        });
        self.events
            .publish(kinds::SWAP, Some(&principal.id), result.clone());
        Ok(result)
    }

    pub async fn dex_add_liquidity(
        &self,
        principal: &Principal,
        pool_id: &str,
        amount_a: u64,
        amount_b: u64,
    ) -> Result<Value, PlatformError> {
        let mut dex = self.dex.lock().await;
        let pool = dex
            .pools
            .get(pool_id)
            .ok_or_else(|| PlatformError::NotFound(format!("pool {}", pool_id)))?;

        let mut staged = pool.clone();
        let minted = staged.add_liquidity(&principal.id, amount_a, amount_b)?;

        let mut tx = self.store.begin().await?;
        repository::subtract_balance(&mut tx, &principal.id, &staged.token_a, amount_a).await?;
        repository::subtract_balance(&mut tx, &principal.id, &staged.token_b, amount_b).await?;
        repository::save_pool(&mut tx, &staged).await?;
        tx.commit().await?;

        dex.pools.insert(pool_id.to_string(), staged.clone());
        drop(dex);

        let result = json!({
            "poolId": pool_id,
            "sharesMinted": minted,
            "totalLpShares": staged.total_lp_shares,
            "reserveA": staged.reserve_a,
            "reserveB": staged.reserve_b,
        });
        self.events
            .publish(kinds::LIQUIDITY, Some(&principal.id), result.clone());
        Ok(result)
    }

    pub async fn dex_remove_liquidity(
        &self,
        principal: &Principal,
        pool_id: &str,
        shares: u64,
    ) -> Result<Value, PlatformError> {
        let mut dex = self.dex.lock().await;
        let pool = dex
            .pools
            .get(pool_id)
            .ok_or_else(|| PlatformError::NotFound(format!("pool {}", pool_id)))?;

        let mut staged = pool.clone();
        let (out_a, out_b) = staged.remove_liquidity(&principal.id, shares)?;

        let mut tx = self.store.begin().await?;
        repository::add_balance(&mut tx, &principal.id, &staged.token_a, out_a).await?;
        repository::add_balance(&mut tx, &principal.id, &staged.token_b, out_b).await?;
        repository::save_pool(&mut tx, &staged).await?;
        tx.commit().await?;

        dex.pools.insert(pool_id.to_string(), staged.clone());
        drop(dex);

        let result = json!({
            "poolId": pool_id,
            "sharesBurned": shares,
            "amountA": out_a,
            "amountB": out_b,
        });
        self.events
            .publish(kinds::LIQUIDITY, Some(&principal.id), result.clone());
        Ok(result)
    }

    pub async fn dex_place_order(
        &self,
        principal: &Principal,
        pool_id: &str,
        side: OrderSide,
        price: f64,
        amount: u64,
    ) -> Result<Value, PlatformError> {
        let mut dex = self.dex.lock().await;
        let pool = dex
            .pools
            .get(pool_id)
            .ok_or_else(|| PlatformError::NotFound(format!("pool {}", pool_id)))?
            .clone();

        let order = LimitOrder::new(
            next_id("ord"),
            principal.id.clone(),
            pool_id.to_string(),
            side,
            price,
            amount,
        )?;
        let lock_token = match side {
            OrderSide::Buy => pool.token_b.clone(),
            OrderSide::Sell => pool.token_a.clone(),
        };
        let lock_amount = order.locked_remaining;
        let order_id = order.id.clone();

        // Stage matching on a book clone so a failed transaction leaves the
        // live book untouched.
        let mut staged_book = dex.book.clone();
        staged_book.place(order.clone());
        let fills = staged_book.match_pool(&pool);

        let mut tx = self.store.begin().await?;
        repository::lock_balance(&mut tx, &principal.id, &lock_token, lock_amount).await?;
        for fill in &fills {
            if fill.lock_debit > 0 {
                repository::spend_locked(&mut tx, &fill.owner, &fill.lock_token, fill.lock_debit)
                    .await?;
            }
            if fill.credit > 0 {
                repository::add_balance(&mut tx, &fill.owner, &fill.credit_token, fill.credit)
                    .await?;
            }
            if fill.lock_refund > 0 {
                repository::unlock_balance(&mut tx, &fill.owner, &fill.lock_token, fill.lock_refund)
                    .await?;
            }
        }
        // Persist the aggressor and every touched resting order.
        let mut touched: Vec<String> = vec![order_id.clone()];
        touched.extend(fills.iter().map(|f| f.order_id.clone()));
        touched.sort();
        touched.dedup();
        for id in &touched {
            if let Some(o) = staged_book.get(id) {
                repository::save_dex_order(&mut tx, o).await?;
            }
        }
        tx.commit().await?;

        dex.book = staged_book;
        let placed = dex.book.get(&order_id).cloned();
        drop(dex);

        let result = json!({
            "orderId": order_id,
            "poolId": pool_id,
            "side": side.to_string(),
            "price": price,
            "amount": amount,
            "status": placed.as_ref().map(|o| o.status),
            "filled": placed.as_ref().map(|o| o.filled).unwrap_or(0),
            "matches": fills.iter().map(|f| json!({
                "orderId": f.order_id,
                "fill": f.fill,
                "price": f.price,
            })).collect::<Vec<_>>(),
        });
        self.events
            .publish(kinds::ORDER, Some(&principal.id), result.clone());
        Ok(result)
    }

    pub async fn dex_cancel_order(
        &self,
        principal: &Principal,
        order_id: &str,
    ) -> Result<Value, PlatformError> {
        let mut dex = self.dex.lock().await;
        let mut staged_book = dex.book.clone();
        let (order, released) = staged_book.cancel(order_id, &principal.id)?;
        let pool = dex
            .pools
            .get(&order.pool_id)
            .ok_or_else(|| PlatformError::NotFound(format!("pool {}", order.pool_id)))?;
        let lock_token = match order.side {
            OrderSide::Buy => pool.token_b.clone(),
            OrderSide::Sell => pool.token_a.clone(),
        };

        let mut tx = self.store.begin().await?;
        if released > 0 {
            repository::unlock_balance(&mut tx, &principal.id, &lock_token, released).await?;
        }
        repository::save_dex_order(&mut tx, &order).await?;
        tx.commit().await?;

        dex.book = staged_book;
        drop(dex);

        let result = json!({
            "orderId": order_id,
            "status": "cancelled",
            "lockReleased": released,
            "lockToken": lock_token,
        });
        self.events
            .publish(kinds::ORDER, Some(&principal.id), result.clone());
        Ok(result)
    }

    pub async fn dex_summary(&self) -> Value {
        let dex = self.dex.lock().await;
        let pools: Vec<Value> = dex.pools.values().map(pool_summary).collect();
        json!({
            "pools": pools,
            "tokenCount": dex.registry.all().len(),
            "openOrders": dex.book.all().iter().filter(|o| o.is_open()).count(),
            "startedAt": self.started_at,
        })
    }

    pub async fn dex_pools(&self) -> Value {
        let dex = self.dex.lock().await;
        let mut pools: Vec<&Pool> = dex.pools.values().collect();
        pools.sort_by(|a, b| a.id.cmp(&b.id));
        json!({ "pools": pools.into_iter().map(pool_summary).collect::<Vec<_>>() })
    }

    pub async fn dex_tokens(&self) -> Value {
        let dex = self.dex.lock().await;
        json!({ "tokens": dex.registry.all() })
    }

    pub async fn dex_orderbook(&self, pool_id: &str) -> Value {
        let dex = self.dex.lock().await;
        let mut buys = Vec::new();
        let mut sells = Vec::new();
        for order in dex.book.open_orders(pool_id) {
            let entry = json!({
                "id": order.id,
                "price": order.price,
                "amount": order.amount,
                "remaining": order.remaining(),
                "status": order.status,
            });
            match order.side {
                OrderSide::Buy => buys.push((order.price, entry)),
                OrderSide::Sell => sells.push((order.price, entry)),
            }
        }
        buys.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        sells.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        json!({
            "pool": pool_id,
            "buys": buys.into_iter().map(|(_, e)| e).collect::<Vec<_>>(),
            "sells": sells.into_iter().map(|(_, e)| e).collect::<Vec<_>>(),
        })
    }

    pub async fn dex_history(&self, limit: u32) -> Result<Value, PlatformError> {
        let mut conn = self.store.acquire().await?;
        let swaps = repository::recent_swaps(&mut conn, limit).await?;
        Ok(json!({ "swaps": swaps }))
    }

    pub async fn dex_balances(&self, principal: &Principal) -> Result<Value, PlatformError> {
        let mut conn = self.store.acquire().await?;
        let rows = repository::wallet_rows(&mut conn, &principal.id).await?;
        Ok(json!({
            "balances": rows.iter().map(|r| json!({
                "token": r.token,
                "balance": r.balance,
                "locked": r.locked,
                "available": r.available(),
            })).collect::<Vec<_>>()
        }))
    }

    /// Grant the starting wallet to a fresh account.
    pub async fn mint_starting_balances(&self, user_id: &str) -> Result<(), PlatformError> {
        let mut tx = self.store.begin().await?;
        for (token, amount) in STARTING_BALANCES {
            repository::add_balance(&mut tx, user_id, token, amount).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// 5-second synthetic ticker: refresh pool price history and publish a
    /// price snapshot.
    pub async fn dex_tick(&self) {
        let mut dex = self.dex.lock().await;
        let now = Utc::now();
        let mut prices = serde_json::Map::new();
        for pool in dex.pools.values_mut() {
            pool.record_price(now);
            if let Some(price) = pool.price_a_in_b() {
                prices.insert(pool.id.clone(), json!(price));
            }
        }
        drop(dex);
        self.events
            .publish(kinds::DEX_UPDATE, None, Value::Object(prices));
    }

    /// Best-effort flush of every pool on shutdown.
    pub async fn flush_pools(&self) {
        let dex = self.dex.lock().await;
        match self.store.acquire().await {
            Ok(mut conn) => {
                for pool in dex.pools.values() {
                    if let Err(e) = repository::save_pool(&mut conn, pool).await {
                        warn!(pool = %pool.id, error = %e, "pool flush failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "pool flush skipped"),
        }
    }

    // -----------------------------------------------------------------------
    // AI operations

    pub async fn ai_analyze(
        &self,
        venue: Venue,
        symbol: &str,
        interval: &str,
        principal: Option<&Principal>,
    ) -> Result<Value, PlatformError> {
        let client = self.market_client(venue).await?;
        let candles = client.get_candles(symbol, interval, 200).await?;
        if candles.len() < MIN_CANDLES_FOR_ANALYSIS {
            return Err(PlatformError::BadInput(format!(
                "need at least {} candles, venue returned {}",
                MIN_CANDLES_FOR_ANALYSIS,
                candles.len()
            )));
        }

        let price = candles.last().map(|c| c.close.value()).unwrap_or(0.0);
        let balance = match principal {
            Some(p) => self.quote_balance(&p.id, venue).await?,
            None => DEFAULT_ANALYSIS_BALANCE,
        };

        let risk_key = principal.map(|p| p.id.clone()).unwrap_or_else(|| "public".to_string());
        let assessment = {
            let mut risk = self.risk.lock().await;
            risk.entry(risk_key)
                .or_insert_with(|| RiskManager::new(RiskConfig::default()))
                .assess(symbol, price, balance)
        };

        let voted = consensus::analyze(&candles);
        let gated = consensus::apply_risk(voted, &assessment);

        let signal = SignalRow {
            id: next_id("sig"),
            symbol: symbol.to_string(),
            venue: venue.name().to_string(),
            interval: interval.to_string(),
            signal: gated.decision.as_str().to_string(),
            score: gated.score,
            confidence: gated.confidence,
            trit: gated.decision.trit().to_string(),
            strategies: serde_json::to_string(&gated.votes)
                .map_err(|e| PlatformError::Store(e.to_string()))?,
            risk: serde_json::to_string(&assessment)
                .map_err(|e| PlatformError::Store(e.to_string()))?,
            created_at: Utc::now(),
        };
        let mut conn = self.store.acquire().await?;
        repository::insert_signal(&mut conn, &signal).await?;

        Ok(json!({
            "signalId": signal.id,
            "consensus": {
                "decision": gated.decision.as_str(),
                "score": gated.score,
                "confidence": gated.confidence,
                "trit": gated.decision.trit(),
                "forcedBy": gated.forced_by,
            },
            "strategies": gated.votes,
            "risk": assessment,
        }))
    }

    pub async fn ai_backtest(
        &self,
        venue: Venue,
        symbol: &str,
        interval: &str,
        count: u32,
    ) -> Result<Value, PlatformError> {
        let client = self.market_client(venue).await?;
        let candles = client.get_candles(symbol, interval, count.clamp(60, 1000)).await?;
        if candles.len() < MIN_CANDLES_FOR_ANALYSIS {
            return Err(PlatformError::BadInput(
                "not enough candles for a backtest".to_string(),
            ));
        }
        let report = backtest::run(&candles, DEFAULT_ANALYSIS_BALANCE);
        Ok(json!({ "symbol": symbol, "venue": venue.name(), "report": report }))
    }

    pub async fn ai_multi_analyze(
        self: &Arc<Self>,
        venue: Venue,
        symbols_csv: &str,
        principal: Option<&Principal>,
    ) -> Result<Value, PlatformError> {
        let mut results = Vec::new();
        for symbol in symbols_csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match self.ai_analyze(venue, symbol, "1h", principal).await {
                Ok(analysis) => results.push(json!({ "symbol": symbol, "analysis": analysis })),
                Err(e) => results.push(json!({ "symbol": symbol, "error": e.to_string() })),
            }
        }
        Ok(json!({ "venue": venue.name(), "results": results }))
    }

    /// The principal's free balance in the venue's quote currency, used as
    /// the risk-gate balance input.
    async fn quote_balance(&self, user_id: &str, venue: Venue) -> Result<f64, PlatformError> {
        let mut conn = self.store.acquire().await?;
        let row = repository::wallet_balance(&mut conn, user_id, venue.quote_currency()).await?;
        Ok(row.available().max(0) as f64)
    }

    // -----------------------------------------------------------------------
    // market data

    pub async fn market_prices(&self, venue: Venue, symbols_csv: &str) -> Result<Value, PlatformError> {
        let client = self.market_client(venue).await?;
        let mut prices = Vec::new();
        for symbol in symbols_csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match client.get_ticker(symbol).await {
                Ok(t) => prices.push(json!({ "symbol": t.symbol, "price": t.price })),
                Err(e) => prices.push(json!({ "symbol": symbol, "error": e.to_string() })),
            }
        }
        let kimchi = self.kimchi_premium().await;
        Ok(json!({ "venue": venue.name(), "prices": prices, "kimchiPremium": kimchi }))
    }

    /// KRW-quoted vs USDT-quoted BTC, minus the assumed FX rate.
    async fn kimchi_premium(&self) -> Option<f64> {
        let upbit = self.market_client(Venue::Upbit).await.ok()?;
        let binance = self.market_client(Venue::Binance).await.ok()?;
        let krw = upbit.get_ticker("KRW-BTC").await.ok()?.price;
        let usdt = binance.get_ticker("BTCUSDT").await.ok()?.price;
        if usdt <= 0.0 {
            return None;
        }
        Some(krw / (usdt * ASSUMED_FX_KRW_PER_USDT) - 1.0)
    }

    pub async fn market_candles(
        &self,
        venue: Venue,
        symbol: &str,
        interval: &str,
        count: u32,
    ) -> Result<Value, PlatformError> {
        let client = self.market_client(venue).await?;
        let candles = client.get_candles(symbol, interval, count).await?;
        Ok(json!({ "venue": venue.name(), "symbol": symbol, "candles": candles }))
    }

    pub async fn market_orderbook(&self, venue: Venue, symbol: &str) -> Result<Value, PlatformError> {
        let client = self.market_client(venue).await?;
        let book = client.get_orderbook(symbol).await?;
        Ok(serde_json::to_value(book).map_err(|e| PlatformError::Store(e.to_string()))?)
    }

    // -----------------------------------------------------------------------
    // exchange operations

    pub async fn exchange_place_order(
        &self,
        principal: &Principal,
        params: &Value,
    ) -> Result<Value, PlatformError> {
        let venue = parse_venue(params)?;
        let side = parse_side(&param_str(params, "side")?)?;
        let order_type = match param_str_or(params, "type", "market").as_str() {
            "limit" => VenueOrderType::Limit,
            _ => VenueOrderType::Market,
        };
        let result = self
            .executor
            .execute_order(ExecuteParams {
                user_id: principal.id.clone(),
                venue,
                symbol: param_str(params, "symbol")?,
                side,
                order_type,
                quantity: param_f64(params, "quantity")?,
                price: params.get("price").and_then(|v| v.as_f64()),
                source: OrderSource::Manual,
                signal_id: None,
            })
            .await?;

        let payload = json!({
            "orderId": result.order_id,
            "exchangeOrderId": result.exchange_order_id,
            "executedQty": result.executed_qty,
            "executedPrice": result.executed_price,
            "venue": venue.name(),
        });
        self.events
            .publish(kinds::EXCHANGE_ORDER, Some(&principal.id), payload.clone());
        Ok(payload)
    }

    pub async fn exchange_cancel_order(
        &self,
        principal: &Principal,
        venue: Venue,
        exchange_order_id: &str,
        symbol: &str,
    ) -> Result<Value, PlatformError> {
        let client = self.executor.client_for(&principal.id, venue).await?;
        client.cancel_order(exchange_order_id, symbol).await?;

        // Reflect the cancellation on the local row when we track it.
        let mut conn = self.store.acquire().await?;
        if let Some(row) =
            repository::find_venue_order_by_exchange_id(&mut conn, &principal.id, exchange_order_id)
                .await?
        {
            let _ = repository::mark_venue_order_final(
                &mut conn,
                &row.id,
                crate::domain::entities::venue_order::VenueOrderStatus::Cancelled,
                row.filled_qty,
                row.filled_price,
            )
            .await?;
        }

        let payload = json!({ "exchangeOrderId": exchange_order_id, "status": "cancelled" });
        self.events
            .publish(kinds::EXCHANGE_ORDER, Some(&principal.id), payload.clone());
        Ok(payload)
    }

    pub async fn exchange_balance(
        &self,
        principal: &Principal,
        venue: Venue,
    ) -> Result<Value, PlatformError> {
        let client = self.executor.client_for(&principal.id, venue).await?;
        let balances = client.get_accounts().await?;
        Ok(json!({ "venue": venue.name(), "balances": balances }))
    }

    pub async fn exchange_open_orders(
        &self,
        principal: &Principal,
        venue: Venue,
        symbol: &str,
    ) -> Result<Value, PlatformError> {
        let client = self.executor.client_for(&principal.id, venue).await?;
        let orders = client.get_open_orders(symbol).await?;
        Ok(json!({
            "venue": venue.name(),
            "orders": orders.iter().map(|o| json!({
                "orderId": o.order_id,
                "status": o.status,
                "executedQty": o.executed_qty,
                "avgPrice": o.avg_price,
            })).collect::<Vec<_>>(),
        }))
    }

    pub async fn exchange_history(
        &self,
        principal: &Principal,
        limit: u32,
    ) -> Result<Value, PlatformError> {
        let mut conn = self.store.acquire().await?;
        let rows = repository::venue_orders_for_user(&mut conn, &principal.id, limit).await?;
        Ok(json!({ "orders": rows }))
    }

    // -----------------------------------------------------------------------
    // key vault operations

    pub async fn keys_save(
        &self,
        principal: &Principal,
        venue: Venue,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Value, PlatformError> {
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(PlatformError::BadInput("accessKey/secretKey".to_string()));
        }
        let sealed = self.vault.seal_pair(access_key, secret_key)?;
        let mut conn = self.store.acquire().await?;
        repository::upsert_venue_key(&mut conn, &principal.id, venue, &sealed, "trade").await?;
        drop(conn);

        // Rotation invalidates the cached client and stops the scheduler.
        self.executor.invalidate(&principal.id, venue).await;
        self.stop_auto_trader(&principal.id, venue).await;

        info!(user_id = %principal.id, venue = %venue, "venue keys saved");
        let masked = KeyVault::mask(access_key, secret_key);
        Ok(json!({
            "venue": venue.name(),
            "accessKey": masked.access_key,
            "secretKey": masked.secret_key,
        }))
    }

    pub async fn keys_get(&self, principal: &Principal, venue: Venue) -> Result<Value, PlatformError> {
        let mut conn = self.store.acquire().await?;
        let row = repository::get_venue_key(&mut conn, &principal.id, venue)
            .await?
            .ok_or_else(|| PlatformError::NotFound("api key".to_string()))?;
        let sealed = SealedKeyPair {
            access_cipher: row.access_cipher,
            secret_cipher: row.secret_cipher,
            iv: row.iv,
            tag: row.tag,
        };
        let (access, secret) = self.vault.open_pair(&sealed)?;
        let masked = KeyVault::mask(&access, &secret);
        Ok(json!({
            "venue": venue.name(),
            "accessKey": masked.access_key,
            "secretKey": masked.secret_key,
            "permissions": row.permissions,
        }))
    }

    pub async fn keys_delete(
        &self,
        principal: &Principal,
        venue: Venue,
    ) -> Result<Value, PlatformError> {
        let mut conn = self.store.acquire().await?;
        let deleted = repository::delete_venue_key(&mut conn, &principal.id, venue).await?;
        if !deleted {
            return Err(PlatformError::NotFound("api key".to_string()));
        }
        drop(conn);

        self.executor.invalidate(&principal.id, venue).await;
        self.stop_auto_trader(&principal.id, venue).await;
        Ok(json!({ "venue": venue.name(), "deleted": true }))
    }

    // -----------------------------------------------------------------------
    // status & events

    pub async fn status(&self) -> Value {
        let dex = self.dex.lock().await;
        let traders = self.auto_traders.lock().await;
        json!({
            "engine": "crownex",
            "version": env!("CARGO_PKG_VERSION"),
            "startedAt": self.started_at,
            "pools": dex.pools.len(),
            "tokens": dex.registry.all().len(),
            "events": self.events.len(),
            "autoTraders": traders.len(),
        })
    }

    pub fn events_recent(&self, principal: &Principal, limit: usize) -> Value {
        let events: Vec<_> = self
            .events
            .recent(limit)
            .into_iter()
            .filter(|e| e.user_id.is_none() || e.user_id.as_deref() == Some(principal.id.as_str()))
            .collect();
        json!({ "events": events })
    }
}

fn pool_summary(pool: &Pool) -> Value {
    json!({
        "id": pool.id,
        "tokenA": pool.token_a,
        "tokenB": pool.token_b,
        "reserveA": pool.reserve_a,
        "reserveB": pool.reserve_b,
        "feeBps": pool.fee_bps,
        "price": pool.price_a_in_b(),
        "totalLpShares": pool.total_lp_shares,
        "volume24h": pool.volume_24h,
        "feesCollected": pool.fees_collected,
        "swapCount": pool.swap_count,
    })
}

fn envelope(mut value: Value) -> Value {
    let header = json!({
        "protocol": "CTP-T",
        "version": env!("CARGO_PKG_VERSION"),
        "trit": "△○▽",
        "engine": "crownex",
    });
    match value.as_object_mut() {
        Some(map) => {
            map.insert("ctp".to_string(), header);
            value
        }
        None => json!({ "ctp": header, "result": value }),
    }
}

fn require<'a>(principal: Option<&'a Principal>) -> Result<&'a Principal, PlatformError> {
    principal.ok_or(PlatformError::AuthRequired)
}

fn param_str(params: &Value, key: &str) -> Result<String, PlatformError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PlatformError::BadInput(key.to_string()))
}

fn param_str_or(params: &Value, key: &str, default: &str) -> String {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

fn param_u64(params: &Value, key: &str) -> Result<u64, PlatformError> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .filter(|&v| v > 0)
        .ok_or_else(|| PlatformError::BadInput(key.to_string()))
}

fn param_f64(params: &Value, key: &str) -> Result<f64, PlatformError> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| PlatformError::BadInput(key.to_string()))
}

fn param_u32_or(params: &Value, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(default)
}

fn parse_side(side: &str) -> Result<OrderSide, PlatformError> {
    match side.to_ascii_lowercase().as_str() {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(PlatformError::BadInput(format!("side {}", other))),
    }
}

fn parse_venue(params: &Value) -> Result<Venue, PlatformError> {
    let name = param_str(params, "exchange").or_else(|_| param_str(params, "venue"))?;
    Venue::from_str(&name)
}

fn parse_venue_or(params: &Value, default: Venue) -> Result<Venue, PlatformError> {
    match params.get("exchange").or_else(|| params.get("venue")) {
        Some(v) => {
            let name = v
                .as_str()
                .ok_or_else(|| PlatformError::BadInput("exchange".to_string()))?;
            Venue::from_str(name)
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn gateway() -> Arc<Gateway> {
        let store = Store::open("sqlite::memory:").await.unwrap();
        let vault = Arc::new(KeyVault::from_key_hex(&"ef".repeat(32)).unwrap());
        Gateway::bootstrap(store, vault).await.unwrap()
    }

    fn principal(id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            email: format!("{}@test", id),
            username: id.to_string(),
            role: "user".to_string(),
            created_at: Utc::now(),
            last_login: None,
        }
    }

    async fn funded_principal(gw: &Arc<Gateway>, id: &str) -> Principal {
        gw.mint_starting_balances(id).await.unwrap();
        principal(id)
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_six_pools() {
        let gw = gateway().await;
        let pools = gw.dex_pools().await;
        let list = pools["pools"].as_array().unwrap();
        assert_eq!(list.len(), 6);

        let crwn_usdt = list.iter().find(|p| p["id"] == "CRWN-USDT").unwrap();
        assert_eq!(crwn_usdt["reserveA"], 10_000_000);
        assert_eq!(crwn_usdt["reserveB"], 1_250_000);
        assert_eq!(crwn_usdt["price"], 0.125);
        assert_eq!(crwn_usdt["feeBps"], 30);
    }

    #[tokio::test]
    async fn test_starting_wallet_mint() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;
        let balances = gw.dex_balances(&p).await.unwrap();
        let list = balances["balances"].as_array().unwrap();
        let find = |token: &str| {
            list.iter()
                .find(|b| b["token"] == token)
                .map(|b| b["balance"].as_u64().unwrap())
                .unwrap_or(0)
        };
        assert_eq!(find("CRWN"), 1_000_000);
        assert_eq!(find("USDT"), 500_000);
        assert_eq!(find("ETH"), 100);
        assert_eq!(find("BTC"), 5);
        assert_eq!(find("KRW"), 100_000_000);
    }

    #[tokio::test]
    async fn test_swap_debits_credits_and_grows_k() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;

        let k_before = {
            let dex = gw.dex.lock().await;
            dex.pools["CRWN-USDT"].k()
        };

        let result = gw.dex_swap(&p, "CRWN-USDT", "CRWN", 10_000).await.unwrap();
        let amount_out = result["amountOut"].as_u64().unwrap();

        // Closed form from the seeded reserves.
        let k = 10_000_000u128 * 1_250_000u128;
        let expected = 1_250_000u64 - (k / (10_000_000u128 + 9_970)) as u64;
        assert_eq!(amount_out, expected);
        assert_eq!(result["fee"], 30);

        let balances = gw.dex_balances(&p).await.unwrap();
        let list = balances["balances"].as_array().unwrap();
        let crwn = list.iter().find(|b| b["token"] == "CRWN").unwrap();
        let usdt = list.iter().find(|b| b["token"] == "USDT").unwrap();
        assert_eq!(crwn["balance"].as_u64().unwrap(), 1_000_000 - 10_000);
        assert_eq!(usdt["balance"].as_u64().unwrap(), 500_000 + amount_out);

        let dex = gw.dex.lock().await;
        assert!(dex.pools["CRWN-USDT"].k() > k_before);
    }

    #[tokio::test]
    async fn test_swap_insufficient_balance_rolls_back() {
        let gw = gateway().await;
        let p = principal("pauper");
        let err = gw.dex_swap(&p, "CRWN-USDT", "CRWN", 10_000).await.unwrap_err();
        assert!(matches!(err, PlatformError::InsufficientBalance { .. }));

        // Pool untouched in memory and on disk.
        let dex = gw.dex.lock().await;
        assert_eq!(dex.pools["CRWN-USDT"].reserve_a, 10_000_000);
        assert_eq!(dex.pools["CRWN-USDT"].swap_count, 0);
    }

    #[tokio::test]
    async fn test_add_then_remove_liquidity_round_trip() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;

        let added = gw
            .dex_add_liquidity(&p, "CRWN-USDT", 100_000, 12_500)
            .await
            .unwrap();
        let minted = added["sharesMinted"].as_u64().unwrap();
        assert!(minted > 0);

        let removed = gw.dex_remove_liquidity(&p, "CRWN-USDT", minted).await.unwrap();
        let out_a = removed["amountA"].as_u64().unwrap();
        let out_b = removed["amountB"].as_u64().unwrap();
        assert!(out_a >= 100_000 - 1 && out_a <= 100_000);
        assert!(out_b >= 12_500 - 1 && out_b <= 12_500);
    }

    #[tokio::test]
    async fn test_place_order_locks_and_match_settles() {
        let gw = gateway().await;
        let alice = funded_principal(&gw, "alice").await;
        let bob = funded_principal(&gw, "bob").await;

        // Alice bids 1000 CRWN at 0.15 USDT: locks 150 USDT.
        gw.dex_place_order(&alice, "CRWN-USDT", OrderSide::Buy, 0.15, 1000)
            .await
            .unwrap();
        let balances = gw.dex_balances(&alice).await.unwrap();
        let usdt = balances["balances"]
            .as_array()
            .unwrap()
            .iter()
            .find(|b| b["token"] == "USDT")
            .unwrap()
            .clone();
        assert_eq!(usdt["locked"].as_u64().unwrap(), 150);

        // Bob offers 1000 CRWN at 0.12: crosses, fills at 0.12.
        let result = gw
            .dex_place_order(&bob, "CRWN-USDT", OrderSide::Sell, 0.12, 1000)
            .await
            .unwrap();
        assert_eq!(result["status"], "filled");

        let alice_after = gw.dex_balances(&alice).await.unwrap();
        let list = alice_after["balances"].as_array().unwrap();
        let usdt = list.iter().find(|b| b["token"] == "USDT").unwrap();
        let crwn = list.iter().find(|b| b["token"] == "CRWN").unwrap();
        // Paid 120, surplus 30 released, 1000 CRWN credited.
        assert_eq!(usdt["balance"].as_u64().unwrap(), 500_000 - 120);
        assert_eq!(usdt["locked"].as_u64().unwrap(), 0);
        assert_eq!(crwn["balance"].as_u64().unwrap(), 1_001_000);

        let bob_after = gw.dex_balances(&bob).await.unwrap();
        let list = bob_after["balances"].as_array().unwrap();
        let usdt = list.iter().find(|b| b["token"] == "USDT").unwrap();
        let crwn = list.iter().find(|b| b["token"] == "CRWN").unwrap();
        assert_eq!(usdt["balance"].as_u64().unwrap(), 500_000 + 120);
        assert_eq!(crwn["balance"].as_u64().unwrap(), 1_000_000 - 1000);
        assert_eq!(crwn["locked"].as_u64().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_lock() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;
        let placed = gw
            .dex_place_order(&p, "CRWN-USDT", OrderSide::Buy, 0.10, 500)
            .await
            .unwrap();
        let order_id = placed["orderId"].as_str().unwrap().to_string();

        gw.dex_cancel_order(&p, &order_id).await.unwrap();
        let balances = gw.dex_balances(&p).await.unwrap();
        let usdt = balances["balances"]
            .as_array()
            .unwrap()
            .iter()
            .find(|b| b["token"] == "USDT")
            .unwrap()
            .clone();
        assert_eq!(usdt["locked"].as_u64().unwrap(), 0);
        assert_eq!(usdt["balance"].as_u64().unwrap(), 500_000);
    }

    #[tokio::test]
    async fn test_route_requires_principal_for_writes() {
        let gw = gateway().await;
        let err = gw
            .route(
                "dex",
                "swap",
                json!({"poolId": "CRWN-USDT", "tokenIn": "CRWN", "amount": 100}),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::AuthRequired));
    }

    #[tokio::test]
    async fn test_route_wraps_with_ctp_envelope() {
        let gw = gateway().await;
        let result = gw.route("dex", "pools", json!({}), None).await.unwrap();
        assert_eq!(result["ctp"]["protocol"], "CTP-T");
        assert_eq!(result["ctp"]["trit"], "△○▽");
        assert_eq!(result["ctp"]["engine"], "crownex");
        assert!(result["pools"].is_array());
    }

    #[tokio::test]
    async fn test_route_rate_limits_principal() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;
        for _ in 0..100 {
            gw.route("dex", "pools", json!({}), Some(&p)).await.unwrap();
        }
        let err = gw.route("dex", "pools", json!({}), Some(&p)).await.unwrap_err();
        assert!(matches!(err, PlatformError::RateLimited));

        // A different principal still gets through.
        let other = funded_principal(&gw, "u2").await;
        assert!(gw.route("dex", "pools", json!({}), Some(&other)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_route_rejected() {
        let gw = gateway().await;
        let err = gw.route("dex", "nonsense", json!({}), None).await.unwrap_err();
        assert!(matches!(err, PlatformError::BadInput(_)));
    }

    #[tokio::test]
    async fn test_keys_save_get_delete_round_trip() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;

        let saved = gw
            .keys_save(&p, Venue::Binance, "AK_1234567890WXYZ", "SK_secretsecretYYZZ")
            .await
            .unwrap();
        assert_eq!(saved["accessKey"], "AK_12345...WXYZ");

        let masked = gw.keys_get(&p, Venue::Binance).await.unwrap();
        assert_eq!(masked["accessKey"], "AK_12345...WXYZ");
        assert_eq!(masked["secretKey"], "****YYZZ");

        gw.keys_delete(&p, Venue::Binance).await.unwrap();
        assert!(matches!(
            gw.keys_get(&p, Venue::Binance).await.unwrap_err(),
            PlatformError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_keys_save_invalidates_executor_cache() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;
        gw.keys_save(&p, Venue::Binance, "AK_1234567890WXYZ", "SK_secretsecretYYZZ")
            .await
            .unwrap();
        gw.executor.client_for(&p.id, Venue::Binance).await.unwrap();
        assert_eq!(gw.executor.cached_client_count().await, 1);

        // Rotation drops the cached client.
        gw.keys_save(&p, Venue::Binance, "AK_rotated_key_0001", "SK_rotated_secret_1")
            .await
            .unwrap();
        assert_eq!(gw.executor.cached_client_count().await, 0);
    }

    #[tokio::test]
    async fn test_events_are_scoped_to_principal() {
        let gw = gateway().await;
        let alice = funded_principal(&gw, "alice").await;
        let bob = funded_principal(&gw, "bob").await;

        gw.dex_swap(&alice, "CRWN-USDT", "CRWN", 10_000).await.unwrap();
        gw.dex_tick().await;

        // Alice sees her swap plus the broadcast tick.
        let alice_events = gw.events_recent(&alice, 100);
        let kinds: Vec<&str> = alice_events["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["kind"].as_str().unwrap())
            .collect();
        assert!(kinds.contains(&"swap"));
        assert!(kinds.contains(&"dex_update"));

        // Bob only sees the broadcast tick.
        let bob_events = gw.events_recent(&bob, 100);
        let kinds: Vec<&str> = bob_events["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["kind"].as_str().unwrap())
            .collect();
        assert!(!kinds.contains(&"swap"));
        assert!(kinds.contains(&"dex_update"));
    }

    #[tokio::test]
    async fn test_dex_tick_extends_price_history() {
        let gw = gateway().await;
        let before = {
            let dex = gw.dex.lock().await;
            dex.pools["CRWN-USDT"].price_history.len()
        };
        gw.dex_tick().await;
        let after = {
            let dex = gw.dex.lock().await;
            dex.pools["CRWN-USDT"].price_history.len()
        };
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn test_flush_pools_persists_state() {
        let gw = gateway().await;
        let p = funded_principal(&gw, "u1").await;
        gw.dex_swap(&p, "CRWN-USDT", "CRWN", 10_000).await.unwrap();
        gw.flush_pools().await;

        let mut conn = gw.store.acquire().await.unwrap();
        let pools = repository::load_pools(&mut conn).await.unwrap();
        let pool = pools.iter().find(|p| p.id == "CRWN-USDT").unwrap();
        assert_eq!(pool.swap_count, 1);
    }
}
