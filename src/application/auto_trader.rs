//! Auto-trading scheduler.
//!
//! One periodic task per enabled (principal, venue) tuple, 30 second
//! cadence. A cycle is strictly sequential per tuple: the next tick only
//! fires after the previous cycle's awaits complete, so cycles never
//! overlap. Cycle errors are published as `auto_error` events and never
//! kill the scheduler.

use crate::application::events::kinds;
use crate::application::executor::ExecuteParams;
use crate::application::gateway::{AutoTraderHandle, Gateway};
use crate::application::next_id;
use crate::domain::entities::auto_config::AutoTradeConfig;
use crate::domain::entities::order::OrderSide;
use crate::domain::entities::principal::Principal;
use crate::domain::entities::venue::Venue;
use crate::domain::entities::venue_order::OrderSource;
use crate::domain::errors::PlatformError;
use crate::domain::services::consensus::{self, Decision};
use crate::domain::services::risk::{RiskConfig, RiskManager};
use crate::domain::value_objects::quantity::Quantity;
use crate::infrastructure::venue_client::VenueOrderType;
use crate::persistence::models::SignalRow;
use crate::persistence::repository;
use chrono::{Duration as ChronoDuration, Local, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CYCLE_INTERVAL: Duration = Duration::from_secs(30);
const CANDLES_PER_CYCLE: u32 = 200;
const CYCLE_INTERVAL_NAME: &str = "1h";

impl Gateway {
    /// Start auto-trading for a tuple. Requires saved venue keys. Re-enable
    /// with a running task is a no-op.
    pub async fn auto_enable(
        self: &Arc<Self>,
        principal: &Principal,
        venue: Venue,
        overrides: Option<&Value>,
    ) -> Result<Value, PlatformError> {
        {
            let mut conn = self.store.acquire().await?;
            repository::get_venue_key(&mut conn, &principal.id, venue)
                .await?
                .ok_or_else(|| PlatformError::NotFound("api key".to_string()))?;
        }

        let mut config = {
            let mut conn = self.store.acquire().await?;
            repository::get_auto_config(&mut conn, &principal.id, venue)
                .await?
                .unwrap_or_else(|| AutoTradeConfig::defaults(&principal.id, venue))
        };
        if let Some(overrides) = overrides {
            apply_overrides(&mut config, overrides);
        }
        config.enabled = true;
        {
            let mut conn = self.store.acquire().await?;
            repository::upsert_auto_config(&mut conn, &config).await?;
        }

        let key = (principal.id.clone(), venue);
        let mut traders = self.auto_traders.lock().await;
        if traders.contains_key(&key) {
            debug!(user_id = %principal.id, venue = %venue, "auto-trader already running");
            return Ok(json!({ "venue": venue.name(), "enabled": true, "running": true }));
        }

        let gateway = Arc::clone(self);
        let user_id = principal.id.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(CYCLE_INTERVAL).await;
                run_cycle(&gateway, &user_id, venue).await;
            }
        });
        traders.insert(key, AutoTraderHandle { task });
        info!(user_id = %principal.id, venue = %venue, "auto-trader started");

        Ok(json!({ "venue": venue.name(), "enabled": true, "running": true }))
    }

    /// Stop the tuple's task and flip the persisted flag.
    pub async fn auto_disable(
        &self,
        principal: &Principal,
        venue: Venue,
    ) -> Result<Value, PlatformError> {
        self.stop_auto_trader(&principal.id, venue).await;
        let mut conn = self.store.acquire().await?;
        repository::set_auto_enabled(&mut conn, &principal.id, venue, false).await?;
        info!(user_id = %principal.id, venue = %venue, "auto-trader disabled");
        Ok(json!({ "venue": venue.name(), "enabled": false, "running": false }))
    }

    pub async fn auto_status(&self, principal: &Principal) -> Result<Value, PlatformError> {
        let traders = self.auto_traders.lock().await;
        let mut conn = self.store.acquire().await?;
        let mut venues = Vec::new();
        for venue in [Venue::Upbit, Venue::Binance] {
            let config = repository::get_auto_config(&mut conn, &principal.id, venue).await?;
            let running = traders.contains_key(&(principal.id.clone(), venue));
            venues.push(json!({
                "venue": venue.name(),
                "running": running,
                "config": config,
            }));
        }
        Ok(json!({ "venues": venues }))
    }

    /// Abort the tuple's task if one is running. Key rotation/deletion and
    /// disable all funnel through here.
    pub async fn stop_auto_trader(&self, user_id: &str, venue: Venue) {
        let mut traders = self.auto_traders.lock().await;
        if let Some(handle) = traders.remove(&(user_id.to_string(), venue)) {
            handle.task.abort();
            info!(user_id, venue = %venue, "auto-trader stopped");
        }
    }
}

fn apply_overrides(config: &mut AutoTradeConfig, overrides: &Value) {
    if let Some(symbols) = overrides.get("symbols").and_then(|v| v.as_str()) {
        config.symbols = symbols.to_string();
    }
    if let Some(v) = overrides.get("maxPositionPct").and_then(|v| v.as_f64()) {
        config.max_position_pct = v.clamp(0.01, 1.0);
    }
    if let Some(v) = overrides.get("stopLossPct").and_then(|v| v.as_f64()) {
        config.stop_loss_pct = v;
    }
    if let Some(v) = overrides.get("takeProfitPct").and_then(|v| v.as_f64()) {
        config.take_profit_pct = v;
    }
    if let Some(v) = overrides.get("minConfidence").and_then(|v| v.as_f64()) {
        config.min_confidence = v.clamp(0.0, 1.0);
    }
    if let Some(v) = overrides.get("maxDailyTrades").and_then(|v| v.as_u64()) {
        config.max_daily_trades = v as u32;
    }
}

/// One full cycle over the tuple's configured symbols.
pub async fn run_cycle(gateway: &Arc<Gateway>, user_id: &str, venue: Venue) {
    let config = {
        let Ok(mut conn) = gateway.store().acquire().await else { return };
        match repository::get_auto_config(&mut conn, user_id, venue).await {
            Ok(Some(config)) if config.enabled => config,
            _ => return,
        }
    };

    for symbol in config.symbol_list() {
        if let Err(e) = cycle_symbol(gateway, user_id, venue, &symbol, &config).await {
            warn!(user_id, venue = %venue, symbol = %symbol, error = %e, "auto-trade cycle error");
            gateway.events.publish(
                kinds::AUTO_ERROR,
                Some(user_id),
                json!({ "venue": venue.name(), "symbol": symbol, "error": e.to_string() }),
            );
        }
    }
}

async fn cycle_symbol(
    gateway: &Arc<Gateway>,
    user_id: &str,
    venue: Venue,
    symbol: &str,
    config: &AutoTradeConfig,
) -> Result<(), PlatformError> {
    let market = gateway.market_client(venue).await?;
    let candles = market
        .get_candles(symbol, CYCLE_INTERVAL_NAME, CANDLES_PER_CYCLE)
        .await?;
    if candles.is_empty() {
        return Err(PlatformError::BadInput(format!("no candles for {}", symbol)));
    }
    let price = candles.last().map(|c| c.close.value()).unwrap_or(0.0);

    let balance = {
        let mut conn = gateway.store().acquire().await?;
        let row =
            repository::wallet_balance(&mut conn, user_id, venue.quote_currency()).await?;
        row.available().max(0) as f64
    };
    let assessment = {
        let mut risk = gateway.risk.lock().await;
        risk.entry(user_id.to_string())
            .or_insert_with(|| RiskManager::new(RiskConfig::default()))
            .assess(symbol, price, balance)
    };

    let gated = consensus::apply_risk(consensus::analyze(&candles), &assessment);

    if gated.confidence < config.min_confidence {
        debug!(symbol, confidence = gated.confidence, "confidence below floor, skipping");
        return Ok(());
    }
    if gated.decision == Decision::Hold {
        return Ok(());
    }
    if !assessment.allowed && gated.forced_by.is_none() {
        debug!(symbol, "risk gate disallows, skipping");
        return Ok(());
    }

    // Counters may have moved since the cycle started; re-read.
    let fresh = {
        let mut conn = gateway.store().acquire().await?;
        repository::get_auto_config(&mut conn, user_id, venue)
            .await?
            .ok_or_else(|| PlatformError::NotFound("auto-trade config".to_string()))?
    };
    if !counters_allow(&gateway.events, &fresh, user_id, symbol) {
        return Ok(());
    }

    let venue_client = gateway.executor.client_for(user_id, venue).await?;
    let accounts = venue_client.get_accounts().await?;
    let balance_of = |currency: &str| {
        accounts
            .iter()
            .find(|b| b.currency.eq_ignore_ascii_case(currency))
            .map(|b| b.balance)
            .unwrap_or(0.0)
    };

    let quantity = match gated.decision {
        // Buy notional in quote units, two decimals; sell size in base
        // units, three decimals.
        Decision::Buy => Quantity::truncate(
            balance_of(venue.quote_currency()) * fresh.max_position_pct,
            2,
        ),
        Decision::Sell => Quantity::truncate(
            balance_of(&base_asset(symbol, venue)) * fresh.max_position_pct,
            3,
        ),
        Decision::Hold => 0.0,
    };
    if quantity <= 0.0 {
        debug!(symbol, "computed quantity is zero, skipping");
        return Ok(());
    }

    let signal = SignalRow {
        id: next_id("sig"),
        symbol: symbol.to_string(),
        venue: venue.name().to_string(),
        interval: CYCLE_INTERVAL_NAME.to_string(),
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
    {
        let mut conn = gateway.store().acquire().await?;
        repository::insert_signal(&mut conn, &signal).await?;
    }

    let side = if gated.decision == Decision::Buy {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    let result = gateway
        .executor
        .execute_order(ExecuteParams {
            user_id: user_id.to_string(),
            venue,
            symbol: symbol.to_string(),
            side,
            order_type: VenueOrderType::Market,
            quantity,
            price: Some(price),
            source: OrderSource::Auto,
            signal_id: Some(signal.id.clone()),
        })
        .await?;

    gateway.events.publish(
        kinds::AUTO_TRADE,
        Some(user_id),
        json!({
            "venue": venue.name(),
            "symbol": symbol,
            "side": side.to_string(),
            "quantity": quantity,
            "orderId": result.order_id,
            "signalId": signal.id,
        }),
    );
    Ok(())
}

/// Counter gate, re-read just before execution. Hitting the loss cap emits
/// `auto_trade_paused`; either cap stops the cycle for this symbol.
fn counters_allow(
    events: &crate::application::events::EventBus,
    fresh: &AutoTradeConfig,
    user_id: &str,
    symbol: &str,
) -> bool {
    if fresh.daily_cap_reached() {
        debug!(symbol, "daily trade cap reached, skipping");
        return false;
    }
    if fresh.loss_cap_reached() {
        events.publish(
            kinds::AUTO_TRADE_PAUSED,
            Some(user_id),
            json!({
                "venue": fresh.venue.name(),
                "symbol": symbol,
                "consecutiveLosses": fresh.consecutive_losses,
            }),
        );
        return false;
    }
    true
}

/// Base asset of a venue symbol: "BTCUSDT" -> "BTC", "KRW-BTC" -> "BTC".
pub fn base_asset(symbol: &str, venue: Venue) -> String {
    let upper = symbol.to_uppercase();
    if let Some((quote, base)) = upper.split_once('-') {
        if quote == "KRW" {
            return base.to_string();
        }
        return quote.to_string();
    }
    upper
        .strip_suffix(venue.quote_currency())
        .or_else(|| upper.strip_suffix("USDT"))
        .or_else(|| upper.strip_suffix("KRW"))
        .unwrap_or(&upper)
        .to_string()
}

/// One-shot delay to the next local midnight, then a 24h cadence resetting
/// every tuple's daily counter.
pub fn spawn_daily_reset(gateway: Arc<Gateway>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let until_midnight = duration_to_next_local_midnight();
            tokio::time::sleep(until_midnight).await;
            match gateway.store().acquire().await {
                Ok(mut conn) => match repository::reset_daily_trades_all(&mut conn).await {
                    Ok(reset) => info!(configs = reset, "daily trade counters reset"),
                    Err(e) => warn!(error = %e, "daily reset failed"),
                },
                Err(e) => warn!(error = %e, "daily reset skipped"),
            }
        }
    })
}

fn duration_to_next_local_midnight() -> Duration {
    let now = Local::now();
    let next_midnight = (now + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    let remaining = next_midnight - now.naive_local();
    remaining.to_std().unwrap_or(Duration::from_secs(24 * 3600))
}
