//! Broadcast fan-out — delivers one timestamped line to every registered
//! connection, evicting any whose delivery handle is dead.
//!
//! Delivery never blocks on a peer: lines go into each session's unbounded
//! outbox and the owning task writes them to its own socket. A failed send
//! means that task is gone, so the entry is removed after the sweep.

use std::sync::Arc;

use chrono::Local;
use tracing::debug;

use super::registry::{ConnId, Registry};

/// Prefix a message with the current wall-clock time, `[HH:MM:SS]`.
fn stamp(message: &str) -> String {
    format!("[{}] {}", Local::now().format("%H:%M:%S"), message)
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Deliver `message` to every registered connection except `exclude`.
    ///
    /// The timestamp is taken once per call, and the recipient set is the
    /// registry snapshot at that moment. Failed deliveries are collected,
    /// never aborting the rest of the sweep, and evicted afterwards.
    pub async fn broadcast(&self, message: &str, exclude: Option<ConnId>) {
        let line = stamp(message);
        let snapshot = self.registry.snapshot().await;

        let mut dead = Vec::new();
        for conn in &snapshot {
            if Some(conn.id) == exclude {
                continue;
            }
            if conn.outbox.send(line.clone()).is_err() {
                dead.push(conn.id);
            }
        }

        for id in dead {
            if let Some(conn) = self.registry.remove(id).await {
                debug!(id = %conn.id, name = %conn.name, "evicted dead connection");
            }
        }
    }

    /// Deliver `message` to a single connection, with the same framing as a
    /// broadcast. No-op if the id is not registered.
    pub async fn send_to(&self, id: ConnId, message: &str) {
        let Some(conn) = self.registry.get(id).await else {
            return;
        };
        if conn.outbox.send(stamp(message)).is_err() {
            if let Some(conn) = self.registry.remove(id).await {
                debug!(id = %conn.id, name = %conn.name, "evicted dead connection");
            }
        }
    }
}
