//! Behaviour of the in-memory coordination store.

use std::time::Duration;

use assert_matches::assert_matches;
use jobwatch_coordination::{CoordinationClient, KeyValue, MemoryCoordination, WatchEvent};

async fn next(stream: &mut jobwatch_coordination::WatchStream) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("watch event within a second")
        .expect("stream open")
}

#[tokio::test]
async fn put_get_delete() {
    let store = MemoryCoordination::default();

    assert_eq!(store.get("/n/a").await.unwrap(), None);
    store.put("/n/a", "100").await.unwrap();
    store.put("/n/a", "200").await.unwrap();
    assert_eq!(store.get("/n/a").await.unwrap().as_deref(), Some("200"));

    assert_eq!(store.delete("/n/a").await.unwrap(), 1);
    assert_eq!(store.delete("/n/a").await.unwrap(), 0);
    assert_eq!(store.get("/n/a").await.unwrap(), None);
}

#[tokio::test]
async fn prefix_scan_is_sorted_and_bounded() {
    let store = MemoryCoordination::default();
    store.put("/group/b", "2").await.unwrap();
    store.put("/group/a", "1").await.unwrap();
    store.put("/groupies", "x").await.unwrap();
    store.put("/node/a", "9").await.unwrap();

    let groups = store.get_prefix("/group/").await.unwrap();
    assert_eq!(
        groups,
        vec![
            KeyValue {
                key: "/group/a".into(),
                value: "1".into()
            },
            KeyValue {
                key: "/group/b".into(),
                value: "2".into()
            },
        ]
    );
    assert!(store.get_prefix("/missing/").await.unwrap().is_empty());
}

#[tokio::test]
async fn watch_sees_changes_under_prefix_in_order() {
    let store = MemoryCoordination::default();
    let mut stream = store.watch("/node/").await.unwrap();

    store.put("/group/g1", "{}").await.unwrap();
    store.put("/node/a", "1").await.unwrap();
    store.delete("/node/a").await.unwrap();
    store.delete("/node/never").await.unwrap();
    store.put("/node/b", "2").await.unwrap();

    assert_eq!(
        next(&mut stream).await,
        WatchEvent::Put {
            key: "/node/a".into(),
            value: "1".into()
        }
    );
    assert_eq!(
        next(&mut stream).await,
        WatchEvent::Delete {
            key: "/node/a".into()
        }
    );
    assert_eq!(next(&mut stream).await.key(), Some("/node/b"));
}

#[tokio::test]
async fn independent_watches_each_get_every_change() {
    let store = MemoryCoordination::default();
    let mut first = store.watch("/node/").await.unwrap();
    let mut second = store.watch("/node/").await.unwrap();

    store.put("/node/a", "1").await.unwrap();

    assert_eq!(next(&mut first).await.key(), Some("/node/a"));
    assert_eq!(next(&mut second).await.key(), Some("/node/a"));
}

#[tokio::test]
async fn lagging_watch_ends_with_closed() {
    let store = MemoryCoordination::new(2);
    let mut stream = store.watch("/node/").await.unwrap();

    // Far more changes than the fan-out holds before the forwarder runs.
    for i in 0..400 {
        store.put(&format!("/node/{i:03}"), "1").await.unwrap();
    }

    let mut last = None;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), stream.recv()).await
    {
        last = Some(event);
    }
    assert_matches!(last, Some(WatchEvent::Closed { .. }));
}

#[tokio::test]
async fn dropping_the_store_closes_watches() {
    let store = MemoryCoordination::default();
    let mut stream = store.watch("/node/").await.unwrap();
    drop(store);

    assert_matches!(next(&mut stream).await, WatchEvent::Closed { .. });
    assert!(stream.recv().await.is_none());
}
