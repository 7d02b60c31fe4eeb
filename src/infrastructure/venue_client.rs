//! Common interface for external venue clients.
//!
//! One client instance serves one credential pair. All methods suspend on
//! network I/O with a 10 second ceiling; a per-instance throttle keeps
//! consecutive requests at least the venue's minimum gap apart.

use crate::domain::entities::order::OrderSide;
use crate::domain::entities::venue::Venue;
use crate::domain::entities::venue_order::VenueOrderStatus;
use crate::domain::errors::PlatformError;
use crate::domain::services::indicators::Candle;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const VENUE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueOrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    /// (price, quantity), best first.
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueBalance {
    pub currency: String,
    pub balance: f64,
    pub locked: f64,
}

#[derive(Debug, Clone)]
pub struct VenueOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: VenueOrderType,
    /// Base units, except market buys which size in quote notional.
    pub quantity: Quantity,
    pub price: Option<Price>,
}

/// Acknowledgement returned by a successful order submission.
#[derive(Debug, Clone)]
pub struct VenueOrderAck {
    pub order_id: String,
    pub executed_qty: f64,
    pub executed_price: f64,
    pub fee: f64,
}

/// A venue's view of an order, used by the fill reconciler.
#[derive(Debug, Clone)]
pub struct VenueOrderState {
    pub order_id: String,
    pub status: VenueOrderStatus,
    pub executed_qty: f64,
    pub avg_price: f64,
}

#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// Chronologically ordered candles, oldest first.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        count: u32,
    ) -> Result<Vec<Candle>, PlatformError>;

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, PlatformError>;

    async fn get_orderbook(&self, symbol: &str) -> Result<OrderBookSnapshot, PlatformError>;

    async fn get_accounts(&self) -> Result<Vec<VenueBalance>, PlatformError>;

    async fn place_order(&self, request: &VenueOrderRequest) -> Result<VenueOrderAck, PlatformError>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), PlatformError>;

    async fn get_order(&self, order_id: &str, symbol: &str)
        -> Result<VenueOrderState, PlatformError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrderState>, PlatformError>;
}

/// Enforces a minimum interval between requests from one client.
#[derive(Debug)]
pub struct RequestThrottle {
    min_gap: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_request: Mutex::new(None),
        }
    }

    pub fn for_venue(venue: Venue) -> Self {
        Self::new(Duration::from_millis(venue.min_request_gap_ms()))
    }

    /// Wait until the venue's minimum gap has elapsed since the previous
    /// call, then claim the slot.
    pub async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        let now = Instant::now();
        if let Some(previous) = *last {
            let ready_at = previous + self.min_gap;
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Shared non-2xx handling: decode the body into the error so callers can
/// persist what the venue actually said.
pub async fn reject_response(response: reqwest::Response) -> PlatformError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    PlatformError::VenueError { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throttle_enforces_gap() {
        let throttle = RequestThrottle::new(Duration::from_millis(50));
        let start = Instant::now();
        throttle.pace().await;
        throttle.pace().await;
        throttle.pace().await;
        // Three paced calls cover at least two full gaps.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_first_call_is_not_delayed() {
        let throttle = RequestThrottle::new(Duration::from_millis(200));
        let start = Instant::now();
        throttle.pace().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_throttle_gap_follows_venue() {
        let t = RequestThrottle::for_venue(Venue::Upbit);
        assert_eq!(t.min_gap, Duration::from_millis(100));
        let t = RequestThrottle::for_venue(Venue::Binance);
        assert_eq!(t.min_gap, Duration::from_millis(50));
    }
}
