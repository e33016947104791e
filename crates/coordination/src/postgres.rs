//! PostgreSQL-backed [`CoordinationClient`].
//!
//! Keys live in `coordination_keys`. A row trigger publishes every change as
//! JSON on the `coordination_changes` channel; watches `LISTEN` on it through
//! a dedicated connection and filter by prefix client-side.

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::client::{CoordinationClient, KeyValue, WatchEvent, WatchStream, WATCH_BUFFER};

/// Notification channel fed by the `coordination_keys` trigger.
pub const CHANGE_CHANNEL: &str = "coordination_changes";

#[derive(Clone)]
pub struct PgCoordination {
    pool: PgPool,
}

impl PgCoordination {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CoordinationClient for PgCoordination {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM coordination_keys WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::unavailable)
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, CoreError> {
        // Byte-wise ordering, independent of the database collation.
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM coordination_keys \
             WHERE starts_with(key, $1) \
             ORDER BY key COLLATE \"C\" ASC",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::unavailable)?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| KeyValue { key, value })
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO coordination_keys (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(CoreError::unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM coordination_keys WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(CoreError::unavailable)?;
        Ok(result.rows_affected())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, CoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(CoreError::unavailable)?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(CoreError::unavailable)?;

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        tokio::spawn(forward(listener, tx, prefix.to_string()));
        Ok(rx)
    }
}

/// Relay notifications under `prefix` until the receiver is dropped or the
/// listener connection breaks.
///
/// `try_recv` reports a lost connection as `Ok(None)`; that ends the stream
/// rather than silently reconnecting, since changes made while disconnected
/// would be missed.
async fn forward(mut listener: PgListener, tx: mpsc::Sender<WatchEvent>, prefix: String) {
    loop {
        let received = tokio::select! {
            _ = tx.closed() => return,
            received = listener.try_recv() => received,
        };

        let notification = match received {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                close(&tx, "listener connection lost".to_string()).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, prefix = %prefix, "Coordination watch failed");
                close(&tx, e.to_string()).await;
                return;
            }
        };

        let event = match serde_json::from_str::<WatchEvent>(notification.payload()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload = notification.payload(),
                    "Skipping undecodable coordination notification"
                );
                continue;
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

async fn close(tx: &mpsc::Sender<WatchEvent>, reason: String) {
    let _ = tx.send(WatchEvent::Closed { reason }).await;
}
