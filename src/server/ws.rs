//! WebSocket endpoint: greeting, in-band auth, subscription-driven price
//! pushes, on-demand analysis, and event fan-out from the gateway bus.
//!
//! Broadcast events go to every socket; principal-scoped events only reach
//! sockets authenticated as that principal.

use crate::application::events::Event;
use crate::domain::entities::principal::Principal;
use crate::domain::entities::venue::Venue;
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const PRICE_PUSH_INTERVAL: Duration = Duration::from_secs(5);

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.get("token").cloned();
    ws.on_upgrade(move |socket| handle_socket(state, socket, token))
}

async fn send_json(sender: &WsSender, value: Value) -> bool {
    sender
        .lock()
        .await
        .send(Message::Text(value.to_string()))
        .await
        .is_ok()
}

async fn handle_socket(state: AppState, socket: WebSocket, token: Option<String>) {
    let (sink, mut stream) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sink));

    let mut principal: Option<Principal> = match token {
        Some(token) => state.auth.verify(&token).await.ok(),
        None => None,
    };

    if !send_json(
        &sender,
        json!({ "type": "connected", "authenticated": principal.is_some() }),
    )
    .await
    {
        return;
    }

    let mut events = state.gateway.events.subscribe();
    let mut price_push: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        let Ok(request) = serde_json::from_str::<Value>(&text) else {
                            let _ = send_json(&sender, json!({
                                "type": "error",
                                "message": "invalid json",
                            })).await;
                            continue;
                        };
                        handle_request(&state, &sender, &mut principal, &mut price_push, request)
                            .await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if visible_to(&event, principal.as_ref()) {
                            let delivered = send_json(&sender, json!({
                                "type": event.kind,
                                "data": event.payload,
                                "at": event.at,
                            })).await;
                            if !delivered {
                                break;
                            }
                        }
                    }
                    // Lagged subscribers just miss events; the ring buffer
                    // endpoint has the history.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket subscriber lagged");
                    }
                    Err(_) => break,
                }
            }
        }
    }

    if let Some(task) = price_push {
        task.abort();
    }
}

fn visible_to(event: &Event, principal: Option<&Principal>) -> bool {
    match &event.user_id {
        None => true,
        Some(owner) => principal.map(|p| p.id == *owner).unwrap_or(false),
    }
}

async fn handle_request(
    state: &AppState,
    sender: &WsSender,
    principal: &mut Option<Principal>,
    price_push: &mut Option<tokio::task::JoinHandle<()>>,
    request: Value,
) {
    match request["type"].as_str() {
        Some("auth") => {
            let verified = match request["token"].as_str() {
                Some(token) => state.auth.verify(token).await.ok(),
                None => None,
            };
            let authenticated = verified.is_some();
            *principal = verified;
            let _ = send_json(sender, json!({ "type": "auth", "authenticated": authenticated }))
                .await;
        }
        Some("subscribe_prices") => {
            if price_push.is_none() {
                let gateway = state.gateway.clone();
                let push_sender = sender.clone();
                *price_push = Some(tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(PRICE_PUSH_INTERVAL).await;
                        let summary = gateway.dex_summary().await;
                        if !send_json(&push_sender, json!({ "type": "prices", "data": summary }))
                            .await
                        {
                            break;
                        }
                    }
                }));
            }
            let _ = send_json(sender, json!({ "type": "subscribed", "channel": "prices" })).await;
        }
        Some("analyze") => {
            let venue = request["exchange"]
                .as_str()
                .and_then(|s| Venue::from_str(s).ok())
                .unwrap_or(Venue::Binance);
            let symbol = request["symbol"].as_str().unwrap_or("BTCUSDT");
            let interval = request["interval"].as_str().unwrap_or("1h");
            let response = match state
                .gateway
                .ai_analyze(venue, symbol, interval, principal.as_ref())
                .await
            {
                Ok(analysis) => json!({ "type": "analysis", "data": analysis }),
                Err(e) => json!({ "type": "error", "message": e.to_string() }),
            };
            let _ = send_json(sender, response).await;
        }
        _ => {
            let _ = send_json(
                sender,
                json!({ "type": "error", "message": "unknown request type" }),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(user_id: Option<&str>) -> Event {
        Event {
            kind: "swap".to_string(),
            user_id: user_id.map(|s| s.to_string()),
            payload: json!({}),
            at: Utc::now(),
        }
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

    #[test]
    fn test_broadcast_events_visible_to_everyone() {
        assert!(visible_to(&event(None), None));
        assert!(visible_to(&event(None), Some(&principal("u1"))));
    }

    #[test]
    fn test_scoped_events_require_matching_principal() {
        let scoped = event(Some("u1"));
        assert!(!visible_to(&scoped, None));
        assert!(!visible_to(&scoped, Some(&principal("u2"))));
        assert!(visible_to(&scoped, Some(&principal("u1"))));
    }
}
