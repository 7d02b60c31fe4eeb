//! Fill reconciliation.
//!
//! Venue submissions return before the order's fate is known. This task
//! periodically polls every `submitted` venue order, finalizes rows from
//! the venue's view, and feeds realized outcomes into the consecutive-loss
//! breaker: a buy fill records the entry price for its (principal, venue,
//! base asset); the next sell fill compares against it and reports
//! profit or loss. Without this loop the breaker would never trip.

use crate::application::auto_trader::base_asset;
use crate::application::events::kinds;
use crate::application::gateway::Gateway;
use crate::domain::entities::venue::Venue;
use crate::domain::entities::venue_order::VenueOrderStatus;
use crate::persistence::repository;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(15);

type EntryKey = (String, Venue, String);

pub struct FillReconciler {
    gateway: Arc<Gateway>,
    /// Last buy fill price per (principal, venue, base asset).
    entries: Mutex<HashMap<EntryKey, f64>>,
}

/// Classify a closing fill against its tracked entry price. `None` means
/// there is nothing to record (an opening fill, or no entry known).
pub fn classify_fill(entry: Option<f64>, side: &str, fill_price: f64) -> Option<bool> {
    if side != "sell" {
        return None;
    }
    let entry = entry?;
    if entry <= 0.0 || fill_price <= 0.0 {
        return None;
    }
    Some(fill_price > entry)
}

impl FillReconciler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RECONCILE_INTERVAL).await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "reconciliation pass failed");
                }
            }
        })
    }

    /// One pass over all submitted orders. Returns how many were finalized.
    pub async fn run_once(&self) -> Result<u32, crate::domain::errors::PlatformError> {
        let rows = {
            let mut conn = self.gateway.store().acquire().await?;
            repository::venue_orders_with_status(&mut conn, VenueOrderStatus::Submitted).await?
        };

        let mut finalized = 0u32;
        for row in rows {
            let Ok(venue) = Venue::from_str(&row.venue) else {
                continue;
            };
            let Some(exchange_order_id) = row.exchange_order_id.as_deref() else {
                continue;
            };

            let client = match self.gateway.executor.client_for(&row.user_id, venue).await {
                Ok(client) => client,
                // Keys were deleted since submission; leave the row alone.
                Err(e) => {
                    debug!(order_id = %row.id, error = %e, "no client for reconciliation");
                    continue;
                }
            };
            let state = match client.get_order(exchange_order_id, &row.symbol).await {
                Ok(state) => state,
                Err(e) => {
                    debug!(order_id = %row.id, error = %e, "venue query failed");
                    continue;
                }
            };

            match state.status {
                VenueOrderStatus::Filled => {
                    let fill_price = if state.avg_price > 0.0 {
                        state.avg_price
                    } else {
                        row.filled_price
                    };
                    let fill_qty = if state.executed_qty > 0.0 {
                        state.executed_qty
                    } else {
                        row.quantity
                    };
                    let moved = {
                        let mut conn = self.gateway.store().acquire().await?;
                        repository::mark_venue_order_final(
                            &mut conn,
                            &row.id,
                            VenueOrderStatus::Filled,
                            fill_qty,
                            fill_price,
                        )
                        .await?
                    };
                    if !moved {
                        continue;
                    }
                    finalized += 1;

                    self.record_outcome(&row.user_id, venue, &row.symbol, &row.side, fill_price)
                        .await;
                    self.gateway.events.publish(
                        kinds::EXCHANGE_ORDER,
                        Some(&row.user_id),
                        json!({
                            "orderId": row.id,
                            "status": "filled",
                            "filledQty": fill_qty,
                            "filledPrice": fill_price,
                        }),
                    );
                }
                VenueOrderStatus::Cancelled => {
                    let moved = {
                        let mut conn = self.gateway.store().acquire().await?;
                        repository::mark_venue_order_final(
                            &mut conn,
                            &row.id,
                            VenueOrderStatus::Cancelled,
                            state.executed_qty,
                            state.avg_price,
                        )
                        .await?
                    };
                    if moved {
                        finalized += 1;
                        self.gateway.events.publish(
                            kinds::EXCHANGE_ORDER,
                            Some(&row.user_id),
                            json!({ "orderId": row.id, "status": "cancelled" }),
                        );
                    }
                }
                // Still working at the venue.
                _ => {}
            }
        }
        Ok(finalized)
    }

    async fn record_outcome(
        &self,
        user_id: &str,
        venue: Venue,
        symbol: &str,
        side: &str,
        fill_price: f64,
    ) {
        let key = (user_id.to_string(), venue, base_asset(symbol, venue));
        let mut entries = self.entries.lock().await;

        if side == "buy" {
            if fill_price > 0.0 {
                entries.insert(key, fill_price);
            }
            return;
        }

        let entry = entries.get(&key).copied();
        if let Some(is_profit) = classify_fill(entry, side, fill_price) {
            entries.remove(&key);
            if let Err(e) = self
                .gateway
                .executor
                .record_trade_result(user_id, venue, is_profit)
                .await
            {
                warn!(user_id, venue = %venue, error = %e, "could not record trade result");
            }
        }
    }
}
