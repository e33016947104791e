//! In-process [`DocumentStore`] used by tests and single-host setups.
//!
//! Every operation takes the collection lock once, so each call is atomic
//! with respect to the others, mirroring per-operation atomicity of a real
//! document database.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::document::{
    compare_values, Document, DocumentStore, Filter, FindOptions, SortKey, SortOrder, Update,
};

/// Collections of JSON documents kept in insertion order.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    indexes: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields indexed on `collection` so far, sorted.
    pub async fn indexed_fields(&self, collection: &str) -> Vec<String> {
        self.indexes
            .read()
            .await
            .get(collection)
            .map(|fields| fields.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn compare_for_sort(a: &Document, b: &Document, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let left = a.get(&key.field).unwrap_or(&Value::Null);
        let right = b.get(&key.field).unwrap_or(&Value::Null);
        // Missing and mismatched kinds sort first, as null does.
        let ord = match (left, right) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => compare_values(left, right).unwrap_or(Ordering::Equal),
        };
        let ord = match key.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, CoreError> {
        let filter = filter.compile();
        let collections = self.collections.read().await;
        let mut matched: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        if !options.sort.is_empty() {
            matched.sort_by(|a, b| compare_for_sort(a, b, &options.sort));
        }

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|mut doc| {
                for field in &options.exclude {
                    doc.remove(field);
                }
                doc
            })
            .collect())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, CoreError> {
        let filter = filter.compile();
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)))
            .cloned())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError> {
        let filter = filter.compile();
        let collections = self.collections.read().await;
        let count = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<(), CoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<u64, CoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let matcher = filter.compile();
        let update = Update::Set(fields);
        let mut modified = 0u64;
        for doc in docs.iter_mut().filter(|d| matcher.matches(d)) {
            update.apply(doc);
            modified += 1;
        }
        Ok(modified)
    }

    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        update: Update,
    ) -> Result<(), CoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        let matcher = filter.compile();
        match docs.iter_mut().find(|d| matcher.matches(d)) {
            Some(existing) => update.apply(existing),
            None => docs.push(update.seed(filter)),
        }
        Ok(())
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let matcher = filter.compile();
        let before = docs.len();
        docs.retain(|d| !matcher.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn create_indexes(&self, collection: &str, fields: &[&str]) -> Result<(), CoreError> {
        let mut indexes = self.indexes.write().await;
        indexes
            .entry(collection.to_string())
            .or_default()
            .extend(fields.iter().map(|f| f.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
