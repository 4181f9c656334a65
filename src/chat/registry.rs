//! Connection registry — the single source of truth for who is online.
//!
//! The map is guarded by an async `RwLock` and only reachable through the
//! accessors here. Critical sections are short and never perform I/O;
//! delivery iterates over a [`Registry::snapshot`] taken under the lock and
//! released before any send.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, RwLock};

/// Opaque connection identity, stable for the lifetime of one accepted
/// stream. Minted by [`Registry::mint`], one per accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An admitted connection. The session task owns the socket; the registry
/// holds the metadata and the outbox used to reach that task.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnId,
    pub name: String,
    pub addr: SocketAddr,
    pub joined_at: DateTime<Local>,
    /// Delivery handle. The owning session drains this onto its socket, so
    /// nothing here ever writes to a transport directly.
    pub outbox: mpsc::UnboundedSender<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Should be unreachable: identities are minted once per accept.
    #[error("connection {0} is already registered")]
    DuplicateIdentity(ConnId),
}

/// Thread-safe map of live, admitted connections.
#[derive(Debug)]
pub struct Registry {
    entries: RwLock<HashMap<ConnId, Connection>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Mint a fresh identity for a newly accepted stream.
    pub fn mint(&self) -> ConnId {
        ConnId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert an admitted connection.
    pub async fn add(&self, conn: Connection) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&conn.id) {
            return Err(RegistryError::DuplicateIdentity(conn.id));
        }
        entries.insert(conn.id, conn);
        Ok(())
    }

    /// Remove a connection. Idempotent: absent ids return `None`.
    pub async fn remove(&self, id: ConnId) -> Option<Connection> {
        self.entries.write().await.remove(&id)
    }

    /// Look up a single connection.
    pub async fn get(&self, id: ConnId) -> Option<Connection> {
        self.entries.read().await.get(&id).cloned()
    }

    /// Point-in-time copy of all entries, ordered by admission.
    pub async fn snapshot(&self) -> Vec<Connection> {
        let entries = self.entries.read().await;
        let mut all: Vec<Connection> = entries.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Display names in admission order. Feeds the `/online` roster.
    pub async fn names(&self) -> Vec<String> {
        self.snapshot().await.into_iter().map(|c| c.name).collect()
    }

    /// Drain every entry (server stop). Returns what was removed.
    pub async fn clear(&self) -> Vec<Connection> {
        let mut entries = self.entries.write().await;
        entries.drain().map(|(_, c)| c).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
