//! End-to-end gateway flows over an in-memory store.
//!
//! Covers the full account lifecycle: register + starting wallet, login
//! token round-trip, DEX swaps and liquidity against the bootstrap pools,
//! limit-order settlement, rate limiting, the auto-trade safety gates and
//! the key vault round-trip.

use crownex::application::executor::ExecuteParams;
use crownex::application::gateway::Gateway;
use crownex::auth::AuthService;
use crownex::domain::entities::auto_config::AutoTradeConfig;
use crownex::domain::entities::order::OrderSide;
use crownex::domain::entities::venue::Venue;
use crownex::domain::entities::venue_order::OrderSource;
use crownex::domain::errors::PlatformError;
use crownex::infrastructure::key_vault::KeyVault;
use crownex::infrastructure::venue_client::VenueOrderType;
use crownex::persistence::{repository, Store};
use crownex::server::status_for;
use serde_json::json;
use std::sync::Arc;

async fn platform() -> (Arc<Gateway>, AuthService) {
    let store = Store::open("sqlite::memory:").await.unwrap();
    let vault = Arc::new(KeyVault::from_key_hex(&"ab".repeat(32)).unwrap());
    let gateway = Gateway::bootstrap(store.clone(), vault).await.unwrap();
    let auth = AuthService::new(store, "integration-test-secret");
    (gateway, auth)
}

fn balance_of(balances: &serde_json::Value, token: &str) -> u64 {
    balances["balances"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["token"] == token)
        .and_then(|b| b["balance"].as_u64())
        .unwrap_or(0)
}

#[tokio::test]
async fn register_mints_starting_wallet_and_login_verifies() {
    let (gateway, auth) = platform().await;

    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();
    gateway.mint_starting_balances(&principal.id).await.unwrap();

    let balances = gateway.dex_balances(&principal).await.unwrap();
    assert_eq!(balance_of(&balances, "CRWN"), 1_000_000);
    assert_eq!(balance_of(&balances, "USDT"), 500_000);
    assert_eq!(balance_of(&balances, "ETH"), 100);
    assert_eq!(balance_of(&balances, "BTC"), 5);
    assert_eq!(balance_of(&balances, "KRW"), 100_000_000);

    let (logged_in, token) = auth.login("a@a", "abcdef").await.unwrap();
    assert_eq!(logged_in.id, principal.id);
    let verified = auth.verify(&token).await.unwrap();
    assert_eq!(verified.username, "a");
}

#[tokio::test]
async fn bootstrap_pool_pricing() {
    let (gateway, _) = platform().await;
    let pools = gateway.dex_pools().await;
    let crwn_usdt = pools["pools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["id"] == "CRWN-USDT")
        .unwrap()
        .clone();
    assert_eq!(crwn_usdt["reserveA"], 10_000_000);
    assert_eq!(crwn_usdt["reserveB"], 1_250_000);
    assert_eq!(crwn_usdt["price"], 0.125);
    assert_eq!(crwn_usdt["feeBps"], 30);
}

#[tokio::test]
async fn swap_matches_closed_form_and_grows_k() {
    let (gateway, auth) = platform().await;
    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();
    gateway.mint_starting_balances(&principal.id).await.unwrap();

    let result = gateway
        .route(
            "dex",
            "swap",
            json!({ "poolId": "CRWN-USDT", "tokenIn": "CRWN", "amount": 10_000 }),
            Some(&principal),
        )
        .await
        .unwrap();

    // amountOut = 1_250_000 - floor(k / (10_000_000 + floor(10_000 * 0.997)))
    let k = 10_000_000u128 * 1_250_000u128;
    let expected = 1_250_000u64 - (k / (10_000_000u128 + 9_970)) as u64;
    assert_eq!(result["amountOut"].as_u64().unwrap(), expected);
    assert_eq!(result["ctp"]["protocol"], "CTP-T");

    let balances = gateway.dex_balances(&principal).await.unwrap();
    assert_eq!(balance_of(&balances, "CRWN"), 1_000_000 - 10_000);
    assert_eq!(balance_of(&balances, "USDT"), 500_000 + expected);

    // Reserve product strictly grew.
    let pools = gateway.dex_pools().await;
    let pool = pools["pools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["id"] == "CRWN-USDT")
        .unwrap()
        .clone();
    let k_after =
        pool["reserveA"].as_u64().unwrap() as u128 * pool["reserveB"].as_u64().unwrap() as u128;
    assert!(k_after > k);
}

#[tokio::test]
async fn swap_round_trip_never_profits() {
    let (gateway, auth) = platform().await;
    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();
    gateway.mint_starting_balances(&principal.id).await.unwrap();

    let x = 50_000u64;
    let out = gateway
        .dex_swap(&principal, "CRWN-USDT", "CRWN", x)
        .await
        .unwrap()["amountOut"]
        .as_u64()
        .unwrap();
    let back = gateway
        .dex_swap(&principal, "CRWN-USDT", "USDT", out)
        .await
        .unwrap()["amountOut"]
        .as_u64()
        .unwrap();
    assert!(back <= x);
}

#[tokio::test]
async fn rate_limit_trips_on_101st_call() {
    let (gateway, auth) = platform().await;
    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();

    for _ in 0..100 {
        gateway
            .route("dex", "pools", json!({}), Some(&principal))
            .await
            .unwrap();
    }
    let err = gateway
        .route("dex", "pools", json!({}), Some(&principal))
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::RateLimited));
    assert_eq!(status_for(&err).as_u16(), 429);
}

#[tokio::test]
async fn loss_breaker_blocks_order_without_a_row() {
    let (gateway, auth) = platform().await;
    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();
    gateway.mint_starting_balances(&principal.id).await.unwrap();

    let config = AutoTradeConfig::defaults(&principal.id, Venue::Binance);
    let mut conn = gateway.store().acquire().await.unwrap();
    repository::upsert_auto_config(&mut conn, &config).await.unwrap();
    for _ in 0..3 {
        repository::increment_consecutive_losses(&mut conn, &principal.id, Venue::Binance)
            .await
            .unwrap();
    }
    drop(conn);

    let err = gateway
        .executor
        .execute_order(ExecuteParams {
            user_id: principal.id.clone(),
            venue: Venue::Binance,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: VenueOrderType::Market,
            quantity: 0.001,
            price: None,
            source: OrderSource::Auto,
            signal_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::SafetyBlocked(_)));

    // No VenueOrder row was created.
    let mut conn = gateway.store().acquire().await.unwrap();
    let rows = repository::venue_orders_for_user(&mut conn, &principal.id, 10)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn key_round_trip_masks_and_invalidates() {
    let (gateway, auth) = platform().await;
    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();

    gateway
        .route(
            "auto",
            "saveApiKeys",
            json!({
                "exchange": "binance",
                "accessKey": "AK_1234567890WXYZ",
                "secretKey": "SK_abcdefghijYYZZ",
            }),
            Some(&principal),
        )
        .await
        .unwrap();

    let masked = gateway
        .route("auto", "getApiKeys", json!({ "exchange": "binance" }), Some(&principal))
        .await
        .unwrap();
    assert_eq!(masked["accessKey"], "AK_12345...WXYZ");
    assert_eq!(masked["secretKey"], "****YYZZ");

    // First client build populates the cache; rotation clears it.
    gateway
        .executor
        .client_for(&principal.id, Venue::Binance)
        .await
        .unwrap();
    assert_eq!(gateway.executor.cached_client_count().await, 1);

    gateway
        .route(
            "auto",
            "saveApiKeys",
            json!({
                "exchange": "binance",
                "accessKey": "AK_rotated_key_9876",
                "secretKey": "SK_rotated_sec_5432",
            }),
            Some(&principal),
        )
        .await
        .unwrap();
    assert_eq!(gateway.executor.cached_client_count().await, 0);

    // Executor's next call is a cache miss that rebuilds from the new keys.
    gateway
        .executor
        .client_for(&principal.id, Venue::Binance)
        .await
        .unwrap();
    assert_eq!(gateway.executor.cached_client_count().await, 1);
}

#[tokio::test]
async fn limit_order_lifecycle_settles_locked_funds() {
    let (gateway, auth) = platform().await;
    let (maker, _) = auth.register("maker@x", "maker", "abcdef").await.unwrap();
    let (taker, _) = auth.register("taker@x", "taker", "abcdef").await.unwrap();
    gateway.mint_starting_balances(&maker.id).await.unwrap();
    gateway.mint_starting_balances(&taker.id).await.unwrap();

    // Maker bids 2000 CRWN at 0.14; locks floor(280) USDT.
    gateway
        .dex_place_order(&maker, "CRWN-USDT", OrderSide::Buy, 0.14, 2000)
        .await
        .unwrap();

    // Taker sells 800 at 0.13: partial fill at the sell price.
    gateway
        .dex_place_order(&taker, "CRWN-USDT", OrderSide::Sell, 0.13, 800)
        .await
        .unwrap();

    let maker_balances = gateway.dex_balances(&maker).await.unwrap();
    // Paid floor(800 * 0.13) = 104; 280 - 104 = 176 still locked.
    let usdt = maker_balances["balances"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["token"] == "USDT")
        .unwrap()
        .clone();
    assert_eq!(usdt["locked"].as_u64().unwrap(), 176);
    assert_eq!(balance_of(&maker_balances, "CRWN"), 1_000_800);

    // Orderbook still shows the maker's remainder.
    let book = gateway.dex_orderbook("CRWN-USDT").await;
    let buys = book["buys"].as_array().unwrap();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0]["remaining"].as_u64().unwrap(), 1200);

    // Cancel releases the remaining lock exactly.
    let order_id = buys[0]["id"].as_str().unwrap().to_string();
    gateway.dex_cancel_order(&maker, &order_id).await.unwrap();
    let maker_balances = gateway.dex_balances(&maker).await.unwrap();
    let usdt = maker_balances["balances"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["token"] == "USDT")
        .unwrap()
        .clone();
    assert_eq!(usdt["locked"].as_u64().unwrap(), 0);
    assert_eq!(usdt["balance"].as_u64().unwrap(), 500_000 - 104);
}

#[tokio::test]
async fn liquidity_round_trip_loses_at_most_one_unit_per_side() {
    let (gateway, auth) = platform().await;
    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();
    gateway.mint_starting_balances(&principal.id).await.unwrap();

    let added = gateway
        .dex_add_liquidity(&principal, "CRWN-USDT", 400_000, 50_000)
        .await
        .unwrap();
    let minted = added["sharesMinted"].as_u64().unwrap();

    let removed = gateway
        .dex_remove_liquidity(&principal, "CRWN-USDT", minted)
        .await
        .unwrap();
    let out_a = removed["amountA"].as_u64().unwrap();
    let out_b = removed["amountB"].as_u64().unwrap();
    assert!(out_a >= 400_000 - 1 && out_a <= 400_000);
    assert!(out_b >= 50_000 - 1 && out_b <= 50_000);

    // Wallet reflects the round trip within the same tolerance.
    let balances = gateway.dex_balances(&principal).await.unwrap();
    assert!(balance_of(&balances, "CRWN") >= 1_000_000 - 1);
    assert!(balance_of(&balances, "USDT") >= 500_000 - 1);
}

#[tokio::test]
async fn swap_history_is_persisted_and_served() {
    let (gateway, auth) = platform().await;
    let (principal, _) = auth.register("a@a", "a", "abcdef").await.unwrap();
    gateway.mint_starting_balances(&principal.id).await.unwrap();

    gateway.dex_swap(&principal, "CRWN-USDT", "CRWN", 10_000).await.unwrap();
    gateway.dex_swap(&principal, "BTC-USDT", "USDT", 50_000).await.unwrap();

    let history = gateway.dex_history(10).await.unwrap();
    let swaps = history["swaps"].as_array().unwrap();
    assert_eq!(swaps.len(), 2);
    // Newest first.
    assert_eq!(swaps[0]["pool_id"], "BTC-USDT");
    assert_eq!(swaps[1]["pool_id"], "CRWN-USDT");
}
