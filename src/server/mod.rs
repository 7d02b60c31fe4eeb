//! HTTP transport: JSON endpoints, CORS, body limits, and the typed
//! error-to-status mapping. Status codes are decided here and nowhere else.

pub mod ws;

use crate::application::gateway::Gateway;
use crate::auth::AuthService;
use crate::domain::entities::principal::Principal;
use crate::domain::entities::venue::Venue;
use crate::domain::errors::PlatformError;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub auth: AuthService,
}

pub fn status_for(error: &PlatformError) -> StatusCode {
    match error {
        PlatformError::AuthRequired | PlatformError::InvalidCredentials => {
            StatusCode::UNAUTHORIZED
        }
        PlatformError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        PlatformError::NotFound(_) => StatusCode::NOT_FOUND,
        PlatformError::Conflict(_) => StatusCode::CONFLICT,
        PlatformError::VenueError { .. } => StatusCode::BAD_GATEWAY,
        PlatformError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        PlatformError::Store(_) | PlatformError::Cryptographic => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = json!({ "error": { "message": self.to_string(), "kind": self } });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/api/auth/register", post(auth_register))
        .route("/api/auth/login", post(auth_login))
        .route("/api/status", get(status))
        .route("/api/dex/summary", get(dex_summary))
        .route("/api/dex/pools", get(dex_pools))
        .route("/api/dex/tokens", get(dex_tokens))
        .route("/api/dex/orderbook", get(dex_orderbook))
        .route("/api/dex/history", get(dex_history))
        .route("/api/dex/balances", get(dex_balances))
        .route("/api/dex/swap", post(dex_swap))
        .route("/api/dex/liquidity", post(dex_liquidity))
        .route("/api/dex/order", post(dex_order))
        .route("/api/market/prices", get(market_prices))
        .route("/api/market/candles", get(market_candles))
        .route("/api/market/orderbook", get(market_orderbook))
        .route("/api/ai/analyze", get(ai_analyze))
        .route("/api/ai/backtest", get(ai_backtest))
        .route("/api/ai/multi-analyze", get(ai_multi_analyze))
        .route("/api/exchange/order", post(exchange_order))
        .route("/api/exchange/cancel", post(exchange_cancel))
        .route("/api/exchange/balance", get(exchange_balance))
        .route("/api/exchange/orders", get(exchange_orders))
        .route("/api/exchange/history", get(exchange_history))
        .route(
            "/api/settings/api-keys",
            post(keys_save).get(keys_get).delete(keys_delete),
        )
        .route("/api/auto/enable", post(auto_enable))
        .route("/api/auto/disable", post(auto_disable))
        .route("/api/auto/status", get(auto_status))
        .route("/api/events", get(events))
        .route("/ws", get(ws::upgrade))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Bearer token from the Authorization header or a `token` query param.
fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    query.get("token").cloned()
}

async fn principal_opt(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<Principal> {
    let token = extract_token(headers, query)?;
    state.auth.verify(&token).await.ok()
}

async fn principal_required(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<Principal, PlatformError> {
    let token = extract_token(headers, query).ok_or(PlatformError::AuthRequired)?;
    state.auth.verify(&token).await
}

fn query_to_value(query: &HashMap<String, String>) -> Value {
    let mut map = serde_json::Map::new();
    for (k, v) in query {
        map.insert(k.clone(), json!(v));
    }
    Value::Object(map)
}

fn venue_from_query(query: &HashMap<String, String>) -> Result<Venue, PlatformError> {
    let name = query
        .get("exchange")
        .or_else(|| query.get("venue"))
        .ok_or_else(|| PlatformError::BadInput("exchange".to_string()))?;
    Venue::from_str(name)
}

// ---------------------------------------------------------------------------
// handlers

async fn auth_register(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let email = body["email"].as_str().unwrap_or_default();
    let username = body["username"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    let (principal, token) = state.auth.register(email, username, password).await?;
    state.gateway.mint_starting_balances(&principal.id).await?;
    Ok(Json(json!({ "user": principal, "token": token })))
}

async fn auth_login(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let identity = body["emailOrUsername"]
        .as_str()
        .or_else(|| body["email"].as_str())
        .or_else(|| body["username"].as_str())
        .unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    let (principal, token) = state.auth.login(identity, password).await?;
    Ok(Json(json!({ "user": principal, "token": token })))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.status().await)
}

async fn dex_summary(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.dex_summary().await)
}

async fn dex_pools(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.dex_pools().await)
}

async fn dex_tokens(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.dex_tokens().await)
}

async fn dex_orderbook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let pool = query
        .get("pool")
        .ok_or_else(|| PlatformError::BadInput("pool".to_string()))?;
    Ok(Json(state.gateway.dex_orderbook(pool).await))
}

async fn dex_history(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let limit = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(50);
    Ok(Json(state.gateway.dex_history(limit).await?))
}

async fn dex_balances(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(state.gateway.dex_balances(&principal).await?))
}

async fn dex_swap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("dex", "swap", body, Some(&principal))
            .await?,
    ))
}

async fn dex_liquidity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    let action = if body.get("shares").is_some() {
        "removeLiquidity"
    } else {
        "addLiquidity"
    };
    Ok(Json(
        state
            .gateway
            .route("dex", action, body, Some(&principal))
            .await?,
    ))
}

async fn dex_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    let action = if body.get("orderId").is_some() {
        "cancelOrder"
    } else {
        "placeOrder"
    };
    Ok(Json(
        state
            .gateway
            .route("dex", action, body, Some(&principal))
            .await?,
    ))
}

async fn market_prices(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let venue = venue_from_query(&query).unwrap_or(Venue::Binance);
    let symbols = query
        .get("symbols")
        .or_else(|| query.get("symbol"))
        .map(|s| s.as_str())
        .unwrap_or("BTCUSDT,ETHUSDT");
    Ok(Json(state.gateway.market_prices(venue, symbols).await?))
}

async fn market_candles(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let venue = venue_from_query(&query).unwrap_or(Venue::Binance);
    let symbol = query.get("symbol").map(|s| s.as_str()).unwrap_or("BTCUSDT");
    let interval = query.get("interval").map(|s| s.as_str()).unwrap_or("1h");
    let count = query.get("count").and_then(|v| v.parse().ok()).unwrap_or(200);
    Ok(Json(
        state
            .gateway
            .market_candles(venue, symbol, interval, count)
            .await?,
    ))
}

async fn market_orderbook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let venue = venue_from_query(&query).unwrap_or(Venue::Binance);
    let symbol = query.get("symbol").map(|s| s.as_str()).unwrap_or("BTCUSDT");
    Ok(Json(state.gateway.market_orderbook(venue, symbol).await?))
}

async fn ai_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_opt(&state, &headers, &query).await;
    Ok(Json(
        state
            .gateway
            .route("ai", "analyze", query_to_value(&query), principal.as_ref())
            .await?,
    ))
}

async fn ai_backtest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_opt(&state, &headers, &query).await;
    Ok(Json(
        state
            .gateway
            .route("ai", "backtest", query_to_value(&query), principal.as_ref())
            .await?,
    ))
}

async fn ai_multi_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_opt(&state, &headers, &query).await;
    Ok(Json(
        state
            .gateway
            .route("ai", "multiAnalyze", query_to_value(&query), principal.as_ref())
            .await?,
    ))
}

async fn exchange_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("exchange", "placeOrder", body, Some(&principal))
            .await?,
    ))
}

async fn exchange_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("exchange", "cancelOrder", body, Some(&principal))
            .await?,
    ))
}

async fn exchange_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("exchange", "balance", query_to_value(&query), Some(&principal))
            .await?,
    ))
}

async fn exchange_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route(
                "exchange",
                "openOrders",
                query_to_value(&query),
                Some(&principal),
            )
            .await?,
    ))
}

async fn exchange_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route(
                "exchange",
                "history",
                query_to_value(&query),
                Some(&principal),
            )
            .await?,
    ))
}

async fn keys_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("auto", "saveApiKeys", body, Some(&principal))
            .await?,
    ))
}

async fn keys_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("auto", "getApiKeys", query_to_value(&query), Some(&principal))
            .await?,
    ))
}

async fn keys_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    let params = body.map(|Json(v)| v).unwrap_or_else(|| query_to_value(&query));
    Ok(Json(
        state
            .gateway
            .route("auto", "deleteApiKeys", params, Some(&principal))
            .await?,
    ))
}

async fn auto_enable(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("auto", "enable", body, Some(&principal))
            .await?,
    ))
}

async fn auto_disable(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("auto", "disable", body, Some(&principal))
            .await?,
    ))
}

async fn auto_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    Ok(Json(
        state
            .gateway
            .route("auto", "status", query_to_value(&query), Some(&principal))
            .await?,
    ))
}

async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, PlatformError> {
    let principal = principal_required(&state, &headers, &query).await?;
    let limit = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(100);
    Ok(Json(state.gateway.events_recent(&principal, limit)))
}
