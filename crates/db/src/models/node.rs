//! Worker node identity mirrored into the document store.

use chrono::serde::ts_milliseconds_option;
use jobwatch_core::types::{Pid, Timestamp};
use serde::{Deserialize, Serialize};

/// Mirrored node identities, keyed by `id`.
pub const COLL_NODE: &str = "jobwatch_node";

/// One worker process.
///
/// `alive`, `up_time` and `down_time` change exactly twice per process
/// lifetime, on start and on stop. `connected` is derived from the presence
/// key when nodes are listed and is never written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Stable machine identifier.
    pub id: String,
    pub pid: Pid,
    pub ip: String,
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    /// Last start.
    #[serde(default, with = "ts_milliseconds_option")]
    pub up_time: Option<Timestamp>,
    /// Last stop.
    #[serde(default, with = "ts_milliseconds_option")]
    pub down_time: Option<Timestamp>,
    #[serde(default)]
    pub alive: bool,
    /// Only meaningful while `alive`.
    #[serde(default)]
    pub connected: bool,
}

impl NodeIdentity {
    pub fn new(
        id: impl Into<String>,
        pid: Pid,
        ip: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            pid,
            ip: ip.into(),
            hostname: hostname.into(),
            version: String::new(),
            up_time: None,
            down_time: None,
            alive: false,
            connected: false,
        }
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node[{}] pid[{}]", self.id, self.pid)
    }
}
