//! The [`CoordinationClient`] contract.

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Capacity of the per-watch delivery channel.
pub const WATCH_BUFFER: usize = 256;

/// One stored key and its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
    /// The stream is broken and delivers nothing further. Watches never
    /// reconnect; callers that need to keep observing open a new one.
    Closed { reason: String },
}

impl WatchEvent {
    /// Key the event concerns; `None` for [`WatchEvent::Closed`].
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => Some(key),
            Self::Closed { .. } => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Receiving end of a watch. Events arrive in the store's write order.
/// Dropping it ends the watch.
pub type WatchStream = mpsc::Receiver<WatchEvent>;

/// Shared key-value store used for presence keys and group definitions.
///
/// Every call is atomic on its own; nothing spans calls.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Value stored at `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Every entry whose key starts with `prefix`, ordered by key ascending.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, CoreError>;

    /// Store `value` at `key` without expiry, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<(), CoreError>;

    /// Remove `key`. Returns the number of keys deleted (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, CoreError>;

    /// Stream puts and deletes of keys under `prefix` made after this call
    /// returns.
    async fn watch(&self, prefix: &str) -> Result<WatchStream, CoreError>;
}
