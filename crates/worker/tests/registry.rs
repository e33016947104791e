//! Node registry behaviour over the in-memory coordination and document
//! stores.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{FakeProbe, UnreachableStore};
use jobwatch_coordination::{CoordinationClient, MemoryCoordination, WatchEvent};
use jobwatch_core::error::CoreError;
use jobwatch_db::models::node::NodeIdentity;
use jobwatch_db::MemoryDocumentStore;
use jobwatch_worker::registry::{GroupDefinition, KeySpace, NodeRegistry, Presence, VERSION};

const KEY: &str = "/jobwatch/node/n1";

struct Fixture {
    coord: Arc<MemoryCoordination>,
    probe: Arc<FakeProbe>,
    registry: NodeRegistry,
}

fn fixture(alive: &[i32]) -> Fixture {
    let coord = Arc::new(MemoryCoordination::default());
    let probe = FakeProbe::with_alive(alive);
    let registry = NodeRegistry::new(
        coord.clone(),
        Arc::new(MemoryDocumentStore::new()),
        KeySpace::default(),
        probe.clone(),
    );
    Fixture {
        coord,
        probe,
        registry,
    }
}

fn node(pid: i32) -> NodeIdentity {
    NodeIdentity::new("n1", pid, "10.0.0.1", "web-01")
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_without_key_is_vacant() {
    let f = fixture(&[]);
    assert_eq!(f.registry.register(&node(100)).await.unwrap(), Presence::Vacant);
}

#[tokio::test]
async fn register_purges_key_of_dead_process() {
    let f = fixture(&[]);
    f.coord.put(KEY, "4242").await.unwrap();

    assert_eq!(f.registry.register(&node(100)).await.unwrap(), Presence::Vacant);
    assert_eq!(f.coord.get(KEY).await.unwrap(), None);
}

#[tokio::test]
async fn register_reports_live_holder_and_keeps_key() {
    let f = fixture(&[4242]);
    f.coord.put(KEY, "4242").await.unwrap();

    let presence = f.registry.register(&node(100)).await.unwrap();
    assert_eq!(presence, Presence::HeldBy(4242));
    assert_eq!(presence.pid(), 4242);
    assert_eq!(f.coord.get(KEY).await.unwrap().as_deref(), Some("4242"));
}

#[tokio::test]
async fn register_purges_corrupt_key() {
    let f = fixture(&[]);
    f.coord.put(KEY, "not-a-pid").await.unwrap();

    assert_eq!(f.registry.register(&node(100)).await.unwrap(), Presence::Vacant);
    assert_eq!(f.coord.get(KEY).await.unwrap(), None);
}

#[tokio::test]
async fn claim_register_release_keeps_one_key() {
    let f = fixture(&[100]);
    let me = node(100);

    f.registry.claim(&me).await.unwrap();
    f.registry.claim(&me).await.unwrap();
    assert_eq!(f.coord.get_prefix("/jobwatch/node/").await.unwrap().len(), 1);
    assert_eq!(f.registry.register(&me).await.unwrap(), Presence::HeldBy(100));

    f.registry.release(&me).await.unwrap();
    assert!(f.coord.get_prefix("/jobwatch/node/").await.unwrap().is_empty());
    assert_eq!(f.registry.register(&me).await.unwrap(), Presence::Vacant);
}

#[tokio::test]
async fn crashed_holder_is_replaced() {
    let f = fixture(&[100]);
    f.registry.claim(&node(100)).await.unwrap();
    f.probe.kill(100);

    let next = node(200);
    assert_eq!(f.registry.register(&next).await.unwrap(), Presence::Vacant);
    f.registry.claim(&next).await.unwrap();
    assert_eq!(f.coord.get(KEY).await.unwrap().as_deref(), Some("200"));
}

#[tokio::test]
async fn watch_streams_presence_changes() {
    let f = fixture(&[]);
    let mut stream = f.registry.watch().await.unwrap();

    f.registry.claim(&node(100)).await.unwrap();
    f.coord.put("/jobwatch/group/g1", "{}").await.unwrap();
    f.registry.release(&node(100)).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        first,
        WatchEvent::Put {
            key: KEY.into(),
            value: "100".into()
        }
    );
    let second = tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, WatchEvent::Delete { key: KEY.into() });
}

// ---------------------------------------------------------------------------
// Identity mirror
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_and_stop_are_mirrored() {
    let f = fixture(&[100]);
    let mut me = node(100);

    f.registry.claim(&me).await.unwrap();
    f.registry.mark_started(&mut me).await;

    let stored = f.registry.find_node("n1").await.unwrap();
    assert!(stored.alive);
    assert!(stored.connected);
    assert_eq!(stored.version, VERSION);
    assert!(stored.up_time.is_some());
    assert_eq!(stored.down_time, None);

    f.registry.release(&me).await.unwrap();
    f.registry.mark_stopped(&mut me).await;

    let stored = f.registry.find_node("n1").await.unwrap();
    assert!(!stored.alive);
    assert!(!stored.connected);
    assert!(stored.down_time.is_some());
    assert_eq!(
        stored.up_time.map(|t| t.timestamp_millis()),
        me.up_time.map(|t| t.timestamp_millis())
    );
}

#[tokio::test]
async fn mirror_failures_are_swallowed() {
    let coord = Arc::new(MemoryCoordination::default());
    let registry = NodeRegistry::new(
        coord,
        Arc::new(UnreachableStore),
        KeySpace::default(),
        FakeProbe::with_alive(&[]),
    );
    let mut me = node(100);

    registry.mark_started(&mut me).await;
    assert!(me.alive);
    registry.mark_stopped(&mut me).await;
    assert!(!me.alive);

    assert_matches!(
        registry.find_node("n1").await,
        Err(CoreError::StoreUnavailable(_))
    );
}

#[tokio::test]
async fn find_node_missing_is_not_found() {
    let f = fixture(&[]);
    assert_matches!(
        f.registry.find_node("ghost").await,
        Err(CoreError::NotFound { entity: "node", .. })
    );
}

#[tokio::test]
async fn list_nodes_marks_connected_only_when_alive_and_present() {
    let f = fixture(&[]);

    let mut running = NodeIdentity::new("a", 1, "10.0.0.1", "a");
    f.registry.claim(&running).await.unwrap();
    f.registry.mark_started(&mut running).await;

    // Alive in the mirror but its key is gone.
    let mut lost = NodeIdentity::new("b", 2, "10.0.0.2", "b");
    f.registry.mark_started(&mut lost).await;

    // Stopped but a key lingers.
    let mut stopped = NodeIdentity::new("c", 3, "10.0.0.3", "c");
    f.registry.claim(&stopped).await.unwrap();
    f.registry.mark_stopped(&mut stopped).await;

    let nodes = f.registry.list_nodes().await.unwrap();
    let flags: Vec<(&str, bool, bool)> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.alive, n.connected))
        .collect();
    assert_eq!(
        flags,
        vec![("a", true, true), ("b", true, false), ("c", false, false)]
    );
}

#[tokio::test]
async fn remove_stale_identity_drops_key_and_mirror() {
    let f = fixture(&[]);
    let mut legacy = NodeIdentity::new("10.0.0.1", 50, "10.0.0.1", "web-01");
    f.registry.claim(&legacy).await.unwrap();
    f.registry.mark_started(&mut legacy).await;

    f.registry.remove_stale_identity("10.0.0.1").await.unwrap();

    assert_eq!(f.coord.get("/jobwatch/node/10.0.0.1").await.unwrap(), None);
    assert_matches!(
        f.registry.find_node("10.0.0.1").await,
        Err(CoreError::NotFound { .. })
    );
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_groups_decodes_in_key_order() {
    let f = fixture(&[]);
    f.coord
        .put("/jobwatch/group/g2", r#"{"id":"g2","name":"db","nids":["n3"]}"#)
        .await
        .unwrap();
    f.coord
        .put("/jobwatch/group/g1", r#"{"id":"g1","name":"web","nids":["n1","n2"]}"#)
        .await
        .unwrap();

    let groups = f.registry.list_groups().await.unwrap();
    assert_eq!(
        groups,
        vec![
            GroupDefinition {
                id: "g1".into(),
                name: "web".into(),
                node_ids: vec!["n1".into(), "n2".into()],
            },
            GroupDefinition {
                id: "g2".into(),
                name: "db".into(),
                node_ids: vec!["n3".into()],
            },
        ]
    );
}

#[tokio::test]
async fn corrupt_group_fails_listing_naming_key() {
    let f = fixture(&[]);
    f.coord
        .put("/jobwatch/group/g1", r#"{"id":"g1","name":"web","nids":[]}"#)
        .await
        .unwrap();
    f.coord.put("/jobwatch/group/g2", "{broken").await.unwrap();

    assert_matches!(
        f.registry.list_groups().await,
        Err(CoreError::Corrupt { key, .. }) if key == "/jobwatch/group/g2"
    );
}
