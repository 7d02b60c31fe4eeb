//! Event log and fan-out.
//!
//! Every gateway mutation publishes an event: into a bounded ring buffer
//! (served by `GET /api/events`) and onto a broadcast channel the websocket
//! layer drains. Events carrying a `user_id` are private to that principal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

pub const EVENT_RING_CAP: usize = 1000;
const BROADCAST_CAP: usize = 256;

pub mod kinds {
    pub const SWAP: &str = "swap";
    pub const ORDER: &str = "order";
    pub const LIQUIDITY: &str = "liquidity";
    pub const DEX_UPDATE: &str = "dex_update";
    pub const EXCHANGE_ORDER: &str = "exchange_order";
    pub const AUTO_TRADE: &str = "auto_trade";
    pub const AUTO_ERROR: &str = "auto_error";
    pub const AUTO_TRADE_PAUSED: &str = "auto_trade_paused";
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: String,
    /// Present on principal-scoped events; None for broadcast events.
    pub user_id: Option<String>,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct EventBus {
    ring: Mutex<VecDeque<Event>>,
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(EVENT_RING_CAP)),
            sender,
        }
    }

    pub fn publish(&self, kind: &str, user_id: Option<&str>, payload: serde_json::Value) {
        let event = Event {
            kind: kind.to_string(),
            user_id: user_id.map(|s| s.to_string()),
            payload,
            at: Utc::now(),
        };

        {
            let mut ring = self.ring.lock().expect("event ring poisoned");
            if ring.len() == EVENT_RING_CAP {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        // No subscribers is fine; the ring still has the event.
        let _ = self.sender.send(event);
    }

    /// Tail of the ring, newest last.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let ring = self.ring.lock().expect("event ring poisoned");
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("event ring poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
