//! Binance REST client (USDT-quoted venue).
//!
//! Private calls append `timestamp` in milliseconds, sign the URL-encoded
//! query with HMAC-SHA256 of the secret key, append the hex digest as
//! `signature`, and carry the access key in `X-MBX-APIKEY`. Only HTTP 200
//! counts as success.

use crate::domain::entities::order::OrderSide;
use crate::domain::entities::venue::Venue;
use crate::domain::entities::venue_order::VenueOrderStatus;
use crate::domain::errors::PlatformError;
use crate::domain::services::indicators::Candle;
use crate::infrastructure::venue_client::{
    reject_response, OrderBookSnapshot, RequestThrottle, Ticker, VenueBalance, VenueClient,
    VenueOrderAck, VenueOrderRequest, VenueOrderState, VenueOrderType, VENUE_TIMEOUT,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use zeroize::Zeroizing;

const BINANCE_API_BASE: &str = "https://api.binance.com";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct BinancePrice {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct BinanceDepth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct BinanceAsset {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct BinanceAccount {
    balances: Vec<BinanceAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrder {
    order_id: i64,
    status: String,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    #[serde(default)]
    price: Option<String>,
}

pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: Zeroizing<String>,
    throttle: RequestThrottle,
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}

impl BinanceClient {
    pub fn new(api_key: &str, secret_key: &str) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(VENUE_TIMEOUT)
            .build()
            .map_err(PlatformError::from)?;
        Ok(Self {
            client,
            base_url: BINANCE_API_BASE.to_string(),
            api_key: api_key.to_string(),
            secret_key: Zeroizing::new(secret_key.to_string()),
            throttle: RequestThrottle::for_venue(Venue::Binance),
        })
    }

    /// Binance symbols are "BTCUSDT". A "KRW-BTC" style symbol is re-quoted
    /// in USDT.
    pub fn normalize_symbol(symbol: &str) -> String {
        let upper = symbol.to_uppercase();
        match upper.split_once('-') {
            Some((quote, base)) if quote == "KRW" => format!("{}USDT", base),
            Some((base, quote)) => format!("{}{}", base, quote),
            None => upper,
        }
    }

    fn timestamp_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in params {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }

    /// Append the timestamp and HMAC signature to a parameter list.
    fn sign_query(&self, params: &[(&str, String)]) -> Result<String, PlatformError> {
        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("timestamp", Self::timestamp_ms().to_string()));
        let query = Self::encode_query(&all);

        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| PlatformError::Cryptographic)?;
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}&signature={}", query, signature))
    }

    fn parse_order(order: BinanceOrder) -> VenueOrderState {
        let status = match order.status.as_str() {
            "NEW" | "PARTIALLY_FILLED" => VenueOrderStatus::Submitted,
            "FILLED" => VenueOrderStatus::Filled,
            "CANCELED" | "REJECTED" | "EXPIRED" => VenueOrderStatus::Cancelled,
            _ => VenueOrderStatus::Submitted,
        };
        let executed_qty: f64 = order
            .executed_qty
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let quote_qty: f64 = order
            .cummulative_quote_qty
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let avg_price = if executed_qty > 0.0 && quote_qty > 0.0 {
            quote_qty / executed_qty
        } else {
            order
                .price
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0)
        };
        VenueOrderState {
            order_id: order.order_id.to_string(),
            status,
            executed_qty,
            avg_price,
        }
    }
}

#[async_trait]
impl VenueClient for BinanceClient {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        count: u32,
    ) -> Result<Vec<Candle>, PlatformError> {
        self.throttle.pace().await;
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            Self::normalize_symbol(symbol),
            interval,
            count.min(1000)
        );
        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }

        // Klines come as positional arrays of mixed number/string fields.
        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        rows.into_iter()
            .map(|row| {
                let ts = row.first().and_then(|v| v.as_i64()).unwrap_or(0);
                let field = |i: usize| -> f64 {
                    row.get(i)
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0.0)
                };
                Candle::new(ts, field(1), field(2), field(3), field(4), field(5))
                    .map_err(PlatformError::BadInput)
            })
            .collect()
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, PlatformError> {
        self.throttle.pace().await;
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            Self::normalize_symbol(symbol)
        );
        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }
        let t: BinancePrice = response.json().await?;
        Ok(Ticker {
            symbol: t.symbol,
            price: t.price.parse().unwrap_or(0.0),
        })
    }

    async fn get_orderbook(&self, symbol: &str) -> Result<OrderBookSnapshot, PlatformError> {
        self.throttle.pace().await;
        let symbol = Self::normalize_symbol(symbol);
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit=20",
            self.base_url, symbol
        );
        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }
        let depth: BinanceDepth = response.json().await?;
        let parse_side = |rows: Vec<(String, String)>| {
            rows.into_iter()
                .map(|(p, q)| (p.parse().unwrap_or(0.0), q.parse().unwrap_or(0.0)))
                .collect()
        };
        Ok(OrderBookSnapshot {
            symbol,
            bids: parse_side(depth.bids),
            asks: parse_side(depth.asks),
        })
    }

    async fn get_accounts(&self) -> Result<Vec<VenueBalance>, PlatformError> {
        self.throttle.pace().await;
        let query = self.sign_query(&[])?;
        let url = format!("{}/api/v3/account?{}", self.base_url, query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }
        let account: BinanceAccount = response.json().await?;
        Ok(account
            .balances
            .into_iter()
            .map(|b| VenueBalance {
                currency: b.asset,
                balance: b.free.parse().unwrap_or(0.0),
                locked: b.locked.parse().unwrap_or(0.0),
            })
            .collect())
    }

    async fn place_order(
        &self,
        request: &VenueOrderRequest,
    ) -> Result<VenueOrderAck, PlatformError> {
        self.throttle.pace().await;
        let symbol = Self::normalize_symbol(&request.symbol);
        let side = match request.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        let mut params: Vec<(&str, String)> = vec![
            ("symbol", symbol.clone()),
            ("side", side.to_string()),
        ];
        match (request.order_type, request.side) {
            // Market buys are sized in quote notional, everything else in
            // base units.
            (VenueOrderType::Market, OrderSide::Buy) => {
                params.push(("type", "MARKET".to_string()));
                params.push(("quoteOrderQty", format!("{}", request.quantity.value())));
            }
            (VenueOrderType::Market, OrderSide::Sell) => {
                params.push(("type", "MARKET".to_string()));
                params.push(("quantity", format!("{}", request.quantity.value())));
            }
            (VenueOrderType::Limit, _) => {
                let price = request
                    .price
                    .ok_or_else(|| PlatformError::BadInput("limit order needs a price".into()))?;
                params.push(("type", "LIMIT".to_string()));
                params.push(("quantity", format!("{}", request.quantity.value())));
                params.push(("price", format!("{}", price.value())));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }

        let query = self.sign_query(&params)?;
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }
        let order: BinanceOrder = response.json().await?;
        info!(order_id = order.order_id, symbol = %symbol, "binance order accepted");
        let state = Self::parse_order(order);
        Ok(VenueOrderAck {
            order_id: state.order_id,
            executed_qty: state.executed_qty,
            executed_price: state.avg_price,
            fee: 0.0,
        })
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), PlatformError> {
        self.throttle.pace().await;
        let params = vec![
            ("symbol", Self::normalize_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ];
        let query = self.sign_query(&params)?;
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }
        info!(order_id, "binance order cancelled");
        Ok(())
    }

    async fn get_order(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<VenueOrderState, PlatformError> {
        self.throttle.pace().await;
        let params = vec![
            ("symbol", Self::normalize_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ];
        let query = self.sign_query(&params)?;
        let url = format!("{}/api/v3/order?{}", self.base_url, query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }
        let order: BinanceOrder = response.json().await?;
        Ok(Self::parse_order(order))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrderState>, PlatformError> {
        self.throttle.pace().await;
        let params = vec![("symbol", Self::normalize_symbol(symbol))];
        let query = self.sign_query(&params)?;
        let url = format!("{}/api/v3/openOrders?{}", self.base_url, query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            return Err(reject_response(response).await);
        }
        let orders: Vec<BinanceOrder> = response.json().await?;
        Ok(orders.into_iter().map(Self::parse_order).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(BinanceClient::normalize_symbol("BTCUSDT"), "BTCUSDT");
        assert_eq!(BinanceClient::normalize_symbol("btcusdt"), "BTCUSDT");
        assert_eq!(BinanceClient::normalize_symbol("KRW-BTC"), "BTCUSDT");
        assert_eq!(BinanceClient::normalize_symbol("ETH-USDT"), "ETHUSDT");
    }

    #[test]
    fn test_sign_query_shape() {
        let client = BinanceClient::new("ak", "sk").unwrap();
        let signed = client
            .sign_query(&[("symbol", "BTCUSDT".to_string())])
            .unwrap();
        assert!(signed.starts_with("symbol=BTCUSDT&timestamp="));
        let sig = signed.split("&signature=").nth(1).unwrap();
        // HMAC-SHA256 hex digest is 64 characters.
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_is_deterministic_for_same_query() {
        // Bypass the timestamp by signing the same fixed string directly.
        let mut mac = HmacSha256::new_from_slice(b"sk").unwrap();
        mac.update(b"symbol=BTCUSDT&timestamp=1700000000000");
        let one = hex::encode(mac.finalize().into_bytes());

        let mut mac = HmacSha256::new_from_slice(b"sk").unwrap();
        mac.update(b"symbol=BTCUSDT&timestamp=1700000000000");
        let two = hex::encode(mac.finalize().into_bytes());
        assert_eq!(one, two);
    }

    #[test]
    fn test_parse_order_statuses() {
        let parse = |status: &str| {
            BinanceClient::parse_order(BinanceOrder {
                order_id: 42,
                status: status.to_string(),
                executed_qty: Some("2.0".to_string()),
                cummulative_quote_qty: Some("100.0".to_string()),
                price: None,
            })
        };
        assert_eq!(parse("NEW").status, VenueOrderStatus::Submitted);
        assert_eq!(parse("FILLED").status, VenueOrderStatus::Filled);
        assert_eq!(parse("CANCELED").status, VenueOrderStatus::Cancelled);
        // Average price recovered from the quote total.
        assert_eq!(parse("FILLED").avg_price, 50.0);
        assert_eq!(parse("FILLED").order_id, "42");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let client = BinanceClient::new("ak", "super-secret").unwrap();
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("super-secret"));
    }
}
