//! Retention scheduler timing over a paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{SlowDeletes, UnreachableStore};
use jobwatch_db::document::{DocumentStore, Filter};
use jobwatch_db::models::job_log::{JobExecutionRecord, COLL_JOB_LOG};
use jobwatch_db::repositories::JobLogStore;
use jobwatch_db::MemoryDocumentStore;
use jobwatch_worker::background::log_retention::RetentionScheduler;
use tokio_util::sync::CancellationToken;

const PERIOD: Duration = Duration::from_secs(600);
const EXPIRATION: Duration = Duration::from_secs(7 * 24 * 3600);

fn expired_run(job_id: &str) -> JobExecutionRecord {
    let ended = Utc::now() - chrono::Duration::days(10);
    JobExecutionRecord {
        id: String::new(),
        job_id: job_id.to_string(),
        job_group: "default".to_string(),
        user: "ops".to_string(),
        name: "nightly".to_string(),
        node: "n1".to_string(),
        hostname: "web-01".to_string(),
        ip: "10.0.0.1".to_string(),
        command: String::new(),
        output: String::new(),
        success: true,
        begin_time: ended - chrono::Duration::minutes(1),
        end_time: ended,
        cleanup: None,
    }
}

async fn history_len(docs: &MemoryDocumentStore) -> u64 {
    docs.count(COLL_JOB_LOG, &Filter::All).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn first_sweep_waits_one_period_then_repeats() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let store = JobLogStore::new(docs.clone());
    store.record(expired_run("j1")).await;

    let cancel = CancellationToken::new();
    let scheduler = RetentionScheduler::new(store.clone(), PERIOD, EXPIRATION);
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    tokio::time::sleep(PERIOD - Duration::from_secs(1)).await;
    assert_eq!(history_len(&docs).await, 1, "no sweep before one period");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(history_len(&docs).await, 0);

    store.record(expired_run("j2")).await;
    tokio::time::sleep(PERIOD).await;
    assert_eq!(history_len(&docs).await, 0, "swept again on the next tick");

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_before_next_tick() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let store = JobLogStore::new(docs.clone());
    store.record(expired_run("j1")).await;

    let cancel = CancellationToken::new();
    let scheduler = RetentionScheduler::new(store, PERIOD, EXPIRATION);
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    handle.await.unwrap();

    tokio::time::sleep(PERIOD * 2).await;
    assert_eq!(history_len(&docs).await, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_long_sweep_skips_overdue_tick() {
    let period = Duration::from_secs(10);
    let docs = SlowDeletes::new(Duration::from_secs(30));
    let store = JobLogStore::new(docs.clone());

    let cancel = CancellationToken::new();
    let scheduler = RetentionScheduler::new(store, period, EXPIRATION);
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    // The first sweep starts at 10s and is still running at 15s.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(docs.deletes(), 1);
    cancel.cancel();

    // By the time the sweep returns, the next tick is already due.
    handle.await.unwrap();
    assert_eq!(docs.deletes(), 1, "no sweep after cancellation");
}

#[tokio::test(start_paused = true)]
async fn failed_sweeps_do_not_stop_the_loop() {
    let store = JobLogStore::new(Arc::new(UnreachableStore));
    let cancel = CancellationToken::new();
    let scheduler = RetentionScheduler::new(store, PERIOD, EXPIRATION);
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    tokio::time::sleep(PERIOD * 3 + Duration::from_secs(1)).await;
    assert!(!handle.is_finished());

    cancel.cancel();
    handle.await.unwrap();
}
