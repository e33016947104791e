use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use jobwatch_core::process::ProcessProbe;
use jobwatch_core::types::Pid;
use jobwatch_db::document::{Document, DocumentStore, Filter, FindOptions, Update};

/// Probe that reports only the pids it was told about as alive.
#[derive(Default)]
pub struct FakeProbe {
    alive: Mutex<HashSet<Pid>>,
}

impl FakeProbe {
    pub fn with_alive(pids: &[Pid]) -> Arc<Self> {
        Arc::new(Self {
            alive: Mutex::new(pids.iter().copied().collect()),
        })
    }

    pub fn kill(&self, pid: Pid) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, pid: Pid) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}

/// Document store whose every call fails as if the server were down.
pub struct UnreachableStore;

fn down() -> CoreError {
    CoreError::StoreUnavailable("connection refused".to_string())
}

#[async_trait]
impl DocumentStore for UnreachableStore {
    async fn find(&self, _: &str, _: &Filter, _: &FindOptions) -> Result<Vec<Document>, CoreError> {
        Err(down())
    }

    async fn find_one(&self, _: &str, _: &Filter) -> Result<Option<Document>, CoreError> {
        Err(down())
    }

    async fn count(&self, _: &str, _: &Filter) -> Result<u64, CoreError> {
        Err(down())
    }

    async fn insert_many(&self, _: &str, _: Vec<Document>) -> Result<(), CoreError> {
        Err(down())
    }

    async fn update_many(&self, _: &str, _: &Filter, _: Document) -> Result<u64, CoreError> {
        Err(down())
    }

    async fn upsert(&self, _: &str, _: &Filter, _: Update) -> Result<(), CoreError> {
        Err(down())
    }

    async fn delete_many(&self, _: &str, _: &Filter) -> Result<u64, CoreError> {
        Err(down())
    }

    async fn create_indexes(&self, _: &str, _: &[&str]) -> Result<(), CoreError> {
        Err(down())
    }
}

/// Memory-backed store whose deletes take `delay` to complete and are
/// counted.
pub struct SlowDeletes {
    inner: jobwatch_db::MemoryDocumentStore,
    delay: Duration,
    deletes: AtomicUsize,
}

impl SlowDeletes {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: jobwatch_db::MemoryDocumentStore::new(),
            delay,
            deletes: AtomicUsize::new(0),
        })
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for SlowDeletes {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, CoreError> {
        self.inner.find(collection, filter, options).await
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, CoreError> {
        self.inner.find_one(collection, filter).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError> {
        self.inner.count(collection, filter).await
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<(), CoreError> {
        self.inner.insert_many(collection, docs).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<u64, CoreError> {
        self.inner.update_many(collection, filter, fields).await
    }

    async fn upsert(&self, collection: &str, filter: &Filter, update: Update) -> Result<(), CoreError> {
        self.inner.upsert(collection, filter, update).await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.delete_many(collection, filter).await
    }

    async fn create_indexes(&self, collection: &str, fields: &[&str]) -> Result<(), CoreError> {
        self.inner.create_indexes(collection, fields).await
    }
}
