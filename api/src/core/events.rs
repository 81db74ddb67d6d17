//! Order lifecycle event hub for the SSE surface.
//!
//! Events get a monotonically increasing id, land in a bounded replay
//! ring (for `Last-Event-ID` resume) and fan out to live subscribers via
//! a broadcast channel.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Default replay ring size.
pub const DEFAULT_BUFFER: usize = 200;

/// One published event.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEvent {
    pub id: u64,
    /// Event name (`order_ingested`, `review_decided`, `order_deleted`).
    pub kind: String,
    pub order_id: String,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

pub struct OrderEventHub {
    next_id: AtomicU64,
    buffer: Mutex<VecDeque<OrderEvent>>,
    capacity: usize,
    tx: broadcast::Sender<OrderEvent>,
}

impl OrderEventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self {
            next_id: AtomicU64::new(1),
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    /// Publishes one event to the ring and to live subscribers.
    pub fn publish(&self, kind: &str, order_id: &str, payload: Value) -> OrderEvent {
        let event = OrderEvent {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind: kind.to_string(),
            order_id: order_id.to_string(),
            payload,
            at: Utc::now(),
        };

        if let Ok(mut buffer) = self.buffer.lock() {
            if buffer.len() == self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        // No live subscribers is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    /// Buffered events with `id > cursor`, oldest first.
    pub fn list_since(&self, cursor: u64) -> Vec<OrderEvent> {
        self.buffer
            .lock()
            .map(|buffer| buffer.iter().filter(|e| e.id > cursor).cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.tx.subscribe()
    }
}

impl Default for OrderEventHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
