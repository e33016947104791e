//! Logs presence changes of cluster nodes.

use jobwatch_coordination::{WatchEvent, WatchStream};
use tokio_util::sync::CancellationToken;

/// Log every event of `stream` until it closes or `cancel` is triggered.
///
/// `node_prefix` is stripped from keys so the log shows bare node ids.
pub async fn run(mut stream: WatchStream, node_prefix: String, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.recv() => event,
        };

        match event {
            Some(WatchEvent::Put { key, value }) => {
                let node_id = key.strip_prefix(node_prefix.as_str()).unwrap_or(&key);
                tracing::info!(node_id, pid = %value, "Node online");
            }
            Some(WatchEvent::Delete { key }) => {
                let node_id = key.strip_prefix(node_prefix.as_str()).unwrap_or(&key);
                tracing::info!(node_id, "Node offline");
            }
            Some(WatchEvent::Closed { reason }) => {
                tracing::warn!(reason = %reason, "Node membership watch closed");
                break;
            }
            None => break,
        }
    }
}
