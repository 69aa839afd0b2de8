//! Broadcast groups of connected gateway clients

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Connection-scoped client identifier
pub type ClientId = u64;

/// Per-client outgoing queue depth
const CLIENT_QUEUE: usize = 256;

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, mpsc::Sender<String>>,
    groups: HashMap<String, HashSet<ClientId>>,
}

/// Registry of connected clients and the groups they joined
#[derive(Default)]
pub struct Groups {
    next_id: AtomicU64,
    inner: RwLock<Inner>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; payloads broadcast to its groups arrive on the
    /// returned receiver
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        self.inner.write().await.clients.insert(id, tx);
        debug!("Gateway client {} connected", id);
        (id, rx)
    }

    /// Add a client to a group
    pub async fn join(&self, client: ClientId, group: &str) {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(&client) {
            return;
        }
        inner
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(client);
        debug!("Gateway client {} joined {}", client, group);
    }

    /// Drop a client and remove it from every group
    pub async fn remove(&self, client: ClientId) {
        let mut inner = self.inner.write().await;
        inner.clients.remove(&client);
        inner.groups.retain(|_, members| {
            members.remove(&client);
            !members.is_empty()
        });
        debug!("Gateway client {} disconnected", client);
    }

    /// Queue a payload for every member of `group`.
    ///
    /// Returns the number of clients it was queued for. A client whose queue
    /// is full misses the payload.
    pub async fn broadcast(&self, group: &str, payload: &str) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.groups.get(group) else {
            return 0;
        };

        let mut delivered = 0;
        for client in members {
            let Some(tx) = inner.clients.get(client) else {
                continue;
            };
            match tx.try_send(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Gateway client {} is too slow, dropping message", client);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Number of clients in a group
    pub async fn group_size(&self, group: &str) -> usize {
        self.inner
            .read()
            .await
            .groups
            .get(group)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}
