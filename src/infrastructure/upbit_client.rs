//! Upbit REST client (KRW-quoted venue).
//!
//! Private calls carry an HS256 JWT of `{access_key, nonce}`; requests with
//! parameters additionally embed `query_hash`, the hex SHA-512 of the
//! URL-encoded parameter string, with `query_hash_alg = "SHA512"`. Both 200
//! and 201 count as success; any other status is surfaced verbatim.

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
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::RngCore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::info;
use zeroize::Zeroizing;

const UPBIT_API_BASE: &str = "https://api.upbit.com";

#[derive(Debug, Serialize, Deserialize)]
struct UpbitClaims {
    access_key: String,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash_alg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpbitCandle {
    timestamp: i64,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    market: String,
    trade_price: f64,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderBookUnit {
    bid_price: f64,
    bid_size: f64,
    ask_price: f64,
    ask_size: f64,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderBook {
    market: String,
    orderbook_units: Vec<UpbitOrderBookUnit>,
}

#[derive(Debug, Deserialize)]
struct UpbitAccount {
    currency: String,
    balance: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct UpbitOrder {
    uuid: String,
    state: String,
    #[serde(default)]
    executed_volume: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
    #[serde(default)]
    paid_fee: Option<String>,
    #[serde(default)]
    price: Option<String>,
}

pub struct UpbitClient {
    client: Client,
    base_url: String,
    access_key: String,
    secret_key: Zeroizing<String>,
    throttle: RequestThrottle,
}

impl std::fmt::Debug for UpbitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpbitClient")
            .field("base_url", &self.base_url)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}

impl UpbitClient {
    pub fn new(access_key: &str, secret_key: &str) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(VENUE_TIMEOUT)
            .build()
            .map_err(PlatformError::from)?;
        Ok(Self {
            client,
            base_url: UPBIT_API_BASE.to_string(),
            access_key: access_key.to_string(),
            secret_key: Zeroizing::new(secret_key.to_string()),
            throttle: RequestThrottle::for_venue(Venue::Upbit),
        })
    }

    /// Upbit markets are "KRW-BTC". Accepts that form directly, or a plain
    /// "BTCUSDT"/"BTC" style symbol whose base gets quoted in KRW.
    pub fn normalize_market(symbol: &str) -> String {
        if symbol.contains('-') {
            return symbol.to_uppercase();
        }
        let upper = symbol.to_uppercase();
        let base = upper
            .strip_suffix("USDT")
            .or_else(|| upper.strip_suffix("KRW"))
            .unwrap_or(&upper);
        format!("KRW-{}", base)
    }

    fn candle_path(interval: &str) -> Result<String, PlatformError> {
        let path = match interval {
            "1m" => "/v1/candles/minutes/1",
            "5m" => "/v1/candles/minutes/5",
            "15m" => "/v1/candles/minutes/15",
            "30m" => "/v1/candles/minutes/30",
            "1h" => "/v1/candles/minutes/60",
            "4h" => "/v1/candles/minutes/240",
            "1d" => "/v1/candles/days",
            other => {
                return Err(PlatformError::BadInput(format!(
                    "unsupported interval: {}",
                    other
                )))
            }
        };
        Ok(path.to_string())
    }

    /// URL-encode `params` the way the signature expects: `k=v` joined by
    /// `&`, in the given order.
    fn encode_query(params: &[(&str, String)]) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in params {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }

    fn auth_token(&self, query: Option<&str>) -> Result<String, PlatformError> {
        let mut nonce_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let claims = match query {
            Some(q) if !q.is_empty() => {
                let digest = Sha512::digest(q.as_bytes());
                UpbitClaims {
                    access_key: self.access_key.clone(),
                    nonce: hex::encode(nonce_bytes),
                    query_hash: Some(hex::encode(digest)),
                    query_hash_alg: Some("SHA512".to_string()),
                }
            }
            _ => UpbitClaims {
                access_key: self.access_key.clone(),
                nonce: hex::encode(nonce_bytes),
                query_hash: None,
                query_hash_alg: None,
            },
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret_key.as_bytes()),
        )
        .map_err(|_| PlatformError::Cryptographic)
    }

    fn is_success(status: reqwest::StatusCode) -> bool {
        status.as_u16() == 200 || status.as_u16() == 201
    }

    fn parse_order(order: UpbitOrder) -> VenueOrderState {
        let status = match order.state.as_str() {
            "wait" | "watch" => VenueOrderStatus::Submitted,
            "done" => VenueOrderStatus::Filled,
            "cancel" => VenueOrderStatus::Cancelled,
            _ => VenueOrderStatus::Submitted,
        };
        VenueOrderState {
            order_id: order.uuid,
            status,
            executed_qty: order
                .executed_volume
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            avg_price: order
                .avg_price
                .or(order.price)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
        }
    }
}

#[async_trait]
impl VenueClient for UpbitClient {
    fn venue(&self) -> Venue {
        Venue::Upbit
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        count: u32,
    ) -> Result<Vec<Candle>, PlatformError> {
        self.throttle.pace().await;
        let path = Self::candle_path(interval)?;
        let market = Self::normalize_market(symbol);
        let url = format!(
            "{}{}?market={}&count={}",
            self.base_url,
            path,
            market,
            count.min(200)
        );

        let response = self.client.get(&url).send().await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }

        let mut raw: Vec<UpbitCandle> = response.json().await?;
        // Upbit returns newest first.
        raw.reverse();
        raw.into_iter()
            .map(|c| {
                Candle::new(
                    c.timestamp,
                    c.opening_price,
                    c.high_price,
                    c.low_price,
                    c.trade_price,
                    c.candle_acc_trade_volume,
                )
                .map_err(PlatformError::BadInput)
            })
            .collect()
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, PlatformError> {
        self.throttle.pace().await;
        let market = Self::normalize_market(symbol);
        let url = format!("{}/v1/ticker?markets={}", self.base_url, market);
        let response = self.client.get(&url).send().await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }
        let tickers: Vec<UpbitTicker> = response.json().await?;
        let t = tickers
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::NotFound(format!("ticker {}", market)))?;
        Ok(Ticker {
            symbol: t.market,
            price: t.trade_price,
        })
    }

    async fn get_orderbook(&self, symbol: &str) -> Result<OrderBookSnapshot, PlatformError> {
        self.throttle.pace().await;
        let market = Self::normalize_market(symbol);
        let url = format!("{}/v1/orderbook?markets={}", self.base_url, market);
        let response = self.client.get(&url).send().await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }
        let books: Vec<UpbitOrderBook> = response.json().await?;
        let book = books
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::NotFound(format!("orderbook {}", market)))?;
        Ok(OrderBookSnapshot {
            symbol: book.market,
            bids: book
                .orderbook_units
                .iter()
                .map(|u| (u.bid_price, u.bid_size))
                .collect(),
            asks: book
                .orderbook_units
                .iter()
                .map(|u| (u.ask_price, u.ask_size))
                .collect(),
        })
    }

    async fn get_accounts(&self) -> Result<Vec<VenueBalance>, PlatformError> {
        self.throttle.pace().await;
        let token = self.auth_token(None)?;
        let url = format!("{}/v1/accounts", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }
        let accounts: Vec<UpbitAccount> = response.json().await?;
        Ok(accounts
            .into_iter()
            .map(|a| VenueBalance {
                currency: a.currency,
                balance: a.balance.parse().unwrap_or(0.0),
                locked: a.locked.parse().unwrap_or(0.0),
            })
            .collect())
    }

    async fn place_order(
        &self,
        request: &VenueOrderRequest,
    ) -> Result<VenueOrderAck, PlatformError> {
        self.throttle.pace().await;
        let market = Self::normalize_market(&request.symbol);
        let side = match request.side {
            OrderSide::Buy => "bid",
            OrderSide::Sell => "ask",
        };

        // Market buys are notional ("price"), market sells are volume
        // ("market"); limit orders carry both price and volume.
        let mut params: Vec<(&str, String)> = vec![
            ("market", market.clone()),
            ("side", side.to_string()),
        ];
        match (request.order_type, request.side) {
            (VenueOrderType::Limit, _) => {
                let price = request
                    .price
                    .ok_or_else(|| PlatformError::BadInput("limit order needs a price".into()))?;
                params.push(("volume", format!("{}", request.quantity.value())));
                params.push(("price", format!("{}", price.value())));
                params.push(("ord_type", "limit".to_string()));
            }
            (VenueOrderType::Market, OrderSide::Buy) => {
                params.push(("price", format!("{}", request.quantity.value())));
                params.push(("ord_type", "price".to_string()));
            }
            (VenueOrderType::Market, OrderSide::Sell) => {
                params.push(("volume", format!("{}", request.quantity.value())));
                params.push(("ord_type", "market".to_string()));
            }
        }

        let query = Self::encode_query(&params);
        let token = self.auth_token(Some(&query))?;
        let url = format!("{}/v1/orders?{}", self.base_url, query);
        let response = self.client.post(&url).bearer_auth(token).send().await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }

        let order: UpbitOrder = response.json().await?;
        info!(order_id = %order.uuid, market = %market, "upbit order accepted");
        let fee = order
            .paid_fee
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let state = Self::parse_order(order);
        Ok(VenueOrderAck {
            order_id: state.order_id,
            executed_qty: state.executed_qty,
            executed_price: state.avg_price,
            fee,
        })
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<(), PlatformError> {
        self.throttle.pace().await;
        let params = vec![("uuid", order_id.to_string())];
        let query = Self::encode_query(&params);
        let token = self.auth_token(Some(&query))?;
        let url = format!("{}/v1/order?{}", self.base_url, query);
        let response = self.client.delete(&url).bearer_auth(token).send().await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }
        info!(order_id, "upbit order cancelled");
        Ok(())
    }

    async fn get_order(
        &self,
        order_id: &str,
        _symbol: &str,
    ) -> Result<VenueOrderState, PlatformError> {
        self.throttle.pace().await;
        let params = vec![("uuid", order_id.to_string())];
        let query = Self::encode_query(&params);
        let token = self.auth_token(Some(&query))?;
        let url = format!("{}/v1/order?{}", self.base_url, query);
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }
        let order: UpbitOrder = response.json().await?;
        Ok(Self::parse_order(order))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrderState>, PlatformError> {
        self.throttle.pace().await;
        let market = Self::normalize_market(symbol);
        let params = vec![("market", market), ("state", "wait".to_string())];
        let query = Self::encode_query(&params);
        let token = self.auth_token(Some(&query))?;
        let url = format!("{}/v1/orders?{}", self.base_url, query);
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        if !Self::is_success(response.status()) {
            return Err(reject_response(response).await);
        }
        let orders: Vec<UpbitOrder> = response.json().await?;
        Ok(orders.into_iter().map(Self::parse_order).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn test_normalize_market() {
        assert_eq!(UpbitClient::normalize_market("BTCUSDT"), "KRW-BTC");
        assert_eq!(UpbitClient::normalize_market("ETHUSDT"), "KRW-ETH");
        assert_eq!(UpbitClient::normalize_market("KRW-BTC"), "KRW-BTC");
        assert_eq!(UpbitClient::normalize_market("btc"), "KRW-BTC");
    }

    #[test]
    fn test_candle_paths() {
        assert_eq!(
            UpbitClient::candle_path("1h").unwrap(),
            "/v1/candles/minutes/60"
        );
        assert_eq!(UpbitClient::candle_path("1d").unwrap(), "/v1/candles/days");
        assert!(UpbitClient::candle_path("13m").is_err());
    }

    #[test]
    fn test_auth_token_without_params() {
        let client = UpbitClient::new("ak", "a-reasonably-long-secret-key-for-test").unwrap();
        let token = client.auth_token(None).unwrap();

        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let data = decode::<UpbitClaims>(
            &token,
            &DecodingKey::from_secret("a-reasonably-long-secret-key-for-test".as_bytes()),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.access_key, "ak");
        assert!(data.claims.query_hash.is_none());
        assert_eq!(data.claims.nonce.len(), 32);
    }

    #[test]
    fn test_auth_token_embeds_query_hash() {
        let client = UpbitClient::new("ak", "a-reasonably-long-secret-key-for-test").unwrap();
        let query = "market=KRW-BTC&side=bid";
        let token = client.auth_token(Some(query)).unwrap();

        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let data = decode::<UpbitClaims>(
            &token,
            &DecodingKey::from_secret("a-reasonably-long-secret-key-for-test".as_bytes()),
            &validation,
        )
        .unwrap();
        let expected = hex::encode(Sha512::digest(query.as_bytes()));
        assert_eq!(data.claims.query_hash.as_deref(), Some(expected.as_str()));
        assert_eq!(data.claims.query_hash_alg.as_deref(), Some("SHA512"));
    }

    #[test]
    fn test_nonces_are_unique() {
        let client = UpbitClient::new("ak", "secret-key-material-0123456789abcdef").unwrap();
        let a = client.auth_token(None).unwrap();
        let b = client.auth_token(None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_order_states() {
        let order = UpbitOrder {
            uuid: "u-1".to_string(),
            state: "done".to_string(),
            executed_volume: Some("0.5".to_string()),
            avg_price: Some("50000".to_string()),
            paid_fee: None,
            price: None,
        };
        let state = UpbitClient::parse_order(order);
        assert_eq!(state.status, VenueOrderStatus::Filled);
        assert_eq!(state.executed_qty, 0.5);
        assert_eq!(state.avg_price, 50_000.0);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let client = UpbitClient::new("ak", "super-secret").unwrap();
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
