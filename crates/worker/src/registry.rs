//! Node liveness registry.
//!
//! A worker announces itself by writing its pid under a presence key in the
//! coordination store and mirrors its identity (alive flag, start and stop
//! times) into the document store. A presence key whose pid no longer
//! refers to a live local process is stale and is purged by whichever
//! reader finds it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use jobwatch_coordination::{CoordinationClient, WatchStream};
use jobwatch_core::error::CoreError;
use jobwatch_core::process::ProcessProbe;
use jobwatch_core::types::Pid;
use jobwatch_db::models::node::NodeIdentity;
use jobwatch_db::repositories::NodeRepo;
use jobwatch_db::DocumentStore;
use serde::{Deserialize, Serialize};

/// Default namespace of presence keys.
pub const DEFAULT_NODE_PREFIX: &str = "/jobwatch/node/";

/// Default namespace of group definitions.
pub const DEFAULT_GROUP_PREFIX: &str = "/jobwatch/group/";

/// Version recorded on every identity this build starts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Coordination-store namespaces used by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    pub node_prefix: String,
    pub group_prefix: String,
}

impl KeySpace {
    /// Presence key of node `id`.
    pub fn node_key(&self, id: &str) -> String {
        format!("{}{}", self.node_prefix, id)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            node_prefix: DEFAULT_NODE_PREFIX.to_string(),
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
        }
    }
}

/// Outcome of [`NodeRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// No live process holds the key; the caller may claim it.
    Vacant,
    /// A live process with this pid holds the key.
    HeldBy(Pid),
}

impl Presence {
    /// Holder pid, or `-1` when vacant.
    pub fn pid(self) -> Pid {
        match self {
            Self::Vacant => -1,
            Self::HeldBy(pid) => pid,
        }
    }
}

/// Named set of node ids used to target job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "nids", default)]
    pub node_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// Presence, identity mirroring and group enumeration for worker nodes.
#[derive(Clone)]
pub struct NodeRegistry {
    coord: Arc<dyn CoordinationClient>,
    docs: Arc<dyn DocumentStore>,
    keys: KeySpace,
    probe: Arc<dyn ProcessProbe>,
}

impl NodeRegistry {
    pub fn new(
        coord: Arc<dyn CoordinationClient>,
        docs: Arc<dyn DocumentStore>,
        keys: KeySpace,
        probe: Arc<dyn ProcessProbe>,
    ) -> Self {
        Self {
            coord,
            docs,
            keys,
            probe,
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    // ── Presence ─────────────────────────────────────────────────────────

    /// Check whether another live process already holds `node`'s presence
    /// key.
    ///
    /// A key whose value is not a pid, or whose pid is not alive on this
    /// host, is deleted and reported as [`Presence::Vacant`].
    pub async fn register(&self, node: &NodeIdentity) -> Result<Presence, CoreError> {
        let key = self.keys.node_key(&node.id);
        let Some(value) = self.coord.get(&key).await? else {
            return Ok(Presence::Vacant);
        };

        let pid = match value.trim().parse::<Pid>() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    value = %value,
                    error = %e,
                    "Removing corrupt presence key"
                );
                self.coord.delete(&key).await?;
                return Ok(Presence::Vacant);
            }
        };

        if self.probe.is_alive(pid) {
            return Ok(Presence::HeldBy(pid));
        }

        tracing::info!(key = %key, pid, "Removing stale presence key");
        self.coord.delete(&key).await?;
        Ok(Presence::Vacant)
    }

    /// Write this process's pid as `node`'s presence key. The key never
    /// expires; [`release`](Self::release) removes it.
    pub async fn claim(&self, node: &NodeIdentity) -> Result<(), CoreError> {
        self.coord
            .put(&self.keys.node_key(&node.id), &node.pid.to_string())
            .await
    }

    pub async fn release(&self, node: &NodeIdentity) -> Result<(), CoreError> {
        self.coord.delete(&self.keys.node_key(&node.id)).await?;
        Ok(())
    }

    /// Stream raw puts and deletes under the presence namespace.
    pub async fn watch(&self) -> Result<WatchStream, CoreError> {
        self.coord.watch(&self.keys.node_prefix).await
    }

    // ── Identity mirror ──────────────────────────────────────────────────

    /// Flag `node` alive with this build's version and the current start
    /// time, then mirror it. Mirror failures are logged only.
    pub async fn mark_started(&self, node: &mut NodeIdentity) {
        node.alive = true;
        node.version = VERSION.to_string();
        node.up_time = Some(Utc::now());
        self.mirror(node).await;
    }

    /// Flag `node` stopped at the current time, then mirror it. Mirror
    /// failures are logged only.
    pub async fn mark_stopped(&self, node: &mut NodeIdentity) {
        node.alive = false;
        node.down_time = Some(Utc::now());
        self.mirror(node).await;
    }

    async fn mirror(&self, node: &NodeIdentity) {
        if let Err(e) = NodeRepo::upsert(self.docs.as_ref(), node).await {
            tracing::error!(
                error = %e,
                node_id = %node.id,
                alive = node.alive,
                "Failed to mirror node identity"
            );
        }
    }

    /// Delete the presence key and the mirrored identity stored under `id`.
    pub async fn remove_stale_identity(&self, id: &str) -> Result<(), CoreError> {
        self.coord.delete(&self.keys.node_key(id)).await?;
        let removed = NodeRepo::remove_by_id(self.docs.as_ref(), id).await?;
        tracing::info!(node_id = %id, removed, "Removed node identity");
        Ok(())
    }

    /// Every mirrored identity, ordered by id, with `connected` set when the
    /// node is alive and its presence key exists.
    pub async fn list_nodes(&self) -> Result<Vec<NodeIdentity>, CoreError> {
        let present: HashSet<String> = self
            .coord
            .get_prefix(&self.keys.node_prefix)
            .await?
            .into_iter()
            .filter_map(|kv| {
                kv.key
                    .strip_prefix(self.keys.node_prefix.as_str())
                    .map(str::to_string)
            })
            .collect();

        let mut nodes = NodeRepo::list(self.docs.as_ref()).await?;
        for node in &mut nodes {
            node.connected = node.alive && present.contains(&node.id);
        }
        Ok(nodes)
    }

    pub async fn find_node(&self, id: &str) -> Result<NodeIdentity, CoreError> {
        let mut node = NodeRepo::find_by_id(self.docs.as_ref(), id)
            .await?
            .ok_or_else(|| CoreError::not_found("node", id))?;
        node.connected = node.alive && self.coord.get(&self.keys.node_key(id)).await?.is_some();
        Ok(node)
    }

    // ── Groups ───────────────────────────────────────────────────────────

    /// All group definitions ordered by key. A single undecodable entry
    /// fails the whole call with [`CoreError::Corrupt`] naming its key.
    pub async fn list_groups(&self) -> Result<Vec<GroupDefinition>, CoreError> {
        self.coord
            .get_prefix(&self.keys.group_prefix)
            .await?
            .into_iter()
            .map(|kv| serde_json::from_str(&kv.value).map_err(|e| CoreError::corrupt(kv.key, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_appends_id() {
        let keys = KeySpace::default();
        assert_eq!(keys.node_key("abc"), "/jobwatch/node/abc");
    }

    #[test]
    fn vacant_pid_is_sentinel() {
        assert_eq!(Presence::Vacant.pid(), -1);
        assert_eq!(Presence::HeldBy(4242).pid(), 4242);
    }

    #[test]
    fn group_uses_nids_on_the_wire() {
        let group: GroupDefinition =
            serde_json::from_str(r#"{"id":"g1","name":"web","nids":["n1","n2"]}"#).unwrap();
        assert_eq!(group.node_ids, vec!["n1", "n2"]);

        let value = serde_json::to_value(&group).unwrap();
        assert_eq!(value["nids"][1], "n2");
    }
}
