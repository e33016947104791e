//! In-process [`CoordinationClient`] backed by a sorted map.
//!
//! Changes are fanned out over a `tokio::sync::broadcast` channel while the
//! map lock is held, so every watcher sees them in write order. Each watch
//! gets a forwarding task that filters by prefix into its own bounded
//! channel.

use std::collections::BTreeMap;

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::client::{CoordinationClient, KeyValue, WatchEvent, WatchStream, WATCH_BUFFER};

/// Default capacity of the change fan-out channel.
const DEFAULT_CAPACITY: usize = 1024;

pub struct MemoryCoordination {
    entries: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<WatchEvent>,
}

impl MemoryCoordination {
    /// Create a store whose watchers may fall at most `capacity` changes
    /// behind before their stream is closed.
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn publish(&self, event: WatchEvent) {
        // Only fails when nobody is watching.
        let _ = self.changes.send(event);
    }
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordination {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, CoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.publish(WatchEvent::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, CoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_none() {
            return Ok(0);
        }
        self.publish(WatchEvent::Delete {
            key: key.to_string(),
        });
        Ok(1)
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, CoreError> {
        let changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        tokio::spawn(forward(changes, tx, prefix.to_string()));
        Ok(rx)
    }
}

/// Forward changes under `prefix` until the receiver is dropped or the
/// fan-out breaks, in which case a final [`WatchEvent::Closed`] is sent.
async fn forward(
    mut changes: broadcast::Receiver<WatchEvent>,
    tx: mpsc::Sender<WatchEvent>,
    prefix: String,
) {
    loop {
        let received = tokio::select! {
            _ = tx.closed() => return,
            received = changes.recv() => received,
        };

        let event = match received {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(prefix = %prefix, skipped, "Watcher fell behind, closing stream");
                let _ = tx
                    .send(WatchEvent::Closed {
                        reason: format!("watcher lagged behind by {skipped} changes"),
                    })
                    .await;
                return;
            }
            Err(broadcast::error::RecvError::Closed) => {
                let _ = tx
                    .send(WatchEvent::Closed {
                        reason: "coordination store dropped".to_string(),
                    })
                    .await;
                return;
            }
        };

        if !event.key().is_some_and(|key| key.starts_with(&prefix)) {
            continue;
        }
        if tx.send(event).await.is_err() {
            return;
        }
    }
}
