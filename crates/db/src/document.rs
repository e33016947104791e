//! Document-store contract.
//!
//! [`DocumentStore`] is the narrow surface the log store and the node mirror
//! need from a document database: filtered find with sort / skip / limit and
//! exclusion projections, point lookups, counts, bulk insert, `$set` updates,
//! `$set` / `$inc` upserts, bulk delete and secondary indexes. Documents are
//! JSON objects; timestamps inside them are integer epoch milliseconds so
//! range comparisons are numeric in every adapter.

use std::cmp::Ordering;

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Predicate over a document's top-level fields.
///
/// A missing field compares equal to `null` and is never ordered against a
/// bound, so range predicates on it are false.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(String, Value),
    /// Field equals any of the listed values. An empty list matches nothing.
    In(String, Vec<Value>),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Field presence (`true`) or absence (`false`).
    Exists(String, bool),
    /// Case-insensitive regular-expression match on a string field.
    Matches(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::Gte(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::Lt(field.to_string(), value.into())
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::Lte(field.to_string(), value.into())
    }

    pub fn exists(field: &str, present: bool) -> Self {
        Self::Exists(field.to_string(), present)
    }

    pub fn matches(field: &str, pattern: impl Into<String>) -> Self {
        Self::Matches(field.to_string(), pattern.into())
    }

    /// Evaluate the predicate against an in-memory document.
    ///
    /// Compiles any patterns first; use [`compile`](Self::compile) when
    /// evaluating against many documents.
    pub fn matches_document(&self, doc: &Document) -> bool {
        self.compile().matches(doc)
    }

    /// Prepare the predicate for repeated evaluation. Each pattern is
    /// compiled once; an invalid pattern is logged here and matches nothing.
    pub fn compile(&self) -> CompiledFilter<'_> {
        match self {
            Filter::Matches(field, pattern) => {
                let re = regex::RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        tracing::warn!(pattern = %pattern, error = %e, "Invalid match pattern");
                    })
                    .ok();
                CompiledFilter::Matches(field, re)
            }
            Filter::And(filters) => CompiledFilter::And(filters.iter().map(Filter::compile).collect()),
            Filter::Or(filters) => CompiledFilter::Or(filters.iter().map(Filter::compile).collect()),
            leaf => CompiledFilter::Leaf(leaf),
        }
    }

    /// Evaluate a predicate that holds no pattern and no junction.
    fn matches_leaf(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => field_value(doc, field) == *expected,
            Filter::In(field, values) => {
                let actual = field_value(doc, field);
                values.iter().any(|v| *v == actual)
            }
            Filter::Gte(field, bound) => doc
                .get(field)
                .and_then(|v| compare_values(v, bound))
                .is_some_and(|o| o != Ordering::Less),
            Filter::Lt(field, bound) => doc
                .get(field)
                .and_then(|v| compare_values(v, bound))
                .is_some_and(|o| o == Ordering::Less),
            Filter::Lte(field, bound) => doc
                .get(field)
                .and_then(|v| compare_values(v, bound))
                .is_some_and(|o| o != Ordering::Greater),
            Filter::Exists(field, present) => doc.contains_key(field) == *present,
            Filter::Matches(..) | Filter::And(_) | Filter::Or(_) => self.matches_document(doc),
        }
    }

    /// Top-level equality constraints, used to seed a document on upsert.
    pub fn equality_fields(&self) -> Document {
        let mut seed = Document::new();
        self.collect_equalities(&mut seed);
        seed
    }

    fn collect_equalities(&self, seed: &mut Document) {
        match self {
            Filter::Eq(field, value) => {
                seed.insert(field.clone(), value.clone());
            }
            Filter::And(filters) => filters.iter().for_each(|f| f.collect_equalities(seed)),
            _ => {}
        }
    }
}

/// A [`Filter`] with its patterns compiled, borrowed for one query.
#[derive(Debug)]
pub enum CompiledFilter<'a> {
    Leaf(&'a Filter),
    /// `None` when the pattern failed to compile.
    Matches(&'a str, Option<regex::Regex>),
    And(Vec<CompiledFilter<'a>>),
    Or(Vec<CompiledFilter<'a>>),
}

impl CompiledFilter<'_> {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            CompiledFilter::Leaf(filter) => filter.matches_leaf(doc),
            CompiledFilter::Matches(field, re) => {
                let Some(re) = re else {
                    return false;
                };
                doc.get(*field)
                    .and_then(Value::as_str)
                    .is_some_and(|text| re.is_match(text))
            }
            CompiledFilter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            CompiledFilter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn field_value(doc: &Document, field: &str) -> Value {
    doc.get(field).cloned().unwrap_or(Value::Null)
}

/// Order two JSON scalars of the same kind. Mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Find options and updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Desc,
        }
    }
}

/// Sort, pagination and projection for [`DocumentStore::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Fields removed from every returned document.
    pub exclude: Vec<String>,
    pub sort: Vec<SortKey>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn sorted(sort: Vec<SortKey>) -> Self {
        Self {
            sort,
            ..Self::default()
        }
    }

    pub fn excluding(mut self, fields: &[&str]) -> Self {
        self.exclude = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn paged(mut self, skip: u64, limit: u64) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }
}

/// Mutation applied by [`DocumentStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Overwrite the listed fields (`$set`).
    Set(Document),
    /// Add to integer fields, treating missing ones as zero (`$inc`).
    Inc(Vec<(String, i64)>),
}

impl Update {
    /// Apply the update to an existing document.
    pub fn apply(&self, doc: &mut Document) {
        match self {
            Update::Set(fields) => {
                for (k, v) in fields {
                    doc.insert(k.clone(), v.clone());
                }
            }
            Update::Inc(deltas) => {
                for (k, delta) in deltas {
                    let current = doc.get(k).and_then(Value::as_i64).unwrap_or(0);
                    doc.insert(k.clone(), Value::from(current + delta));
                }
            }
        }
    }

    /// The document inserted when an upsert matches nothing.
    pub fn seed(&self, filter: &Filter) -> Document {
        let mut doc = filter.equality_fields();
        self.apply(&mut doc);
        doc
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Persistent document database, one round trip per call.
///
/// Implementations must be safe to share across tasks; every method is a
/// single-operation write or read with no client-side locking across calls.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, CoreError>;

    async fn find_one(&self, collection: &str, filter: &Filter)
        -> Result<Option<Document>, CoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError>;

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<(), CoreError>;

    /// `$set` the given fields on every matching document. Returns the number
    /// of documents modified.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<u64, CoreError>;

    /// Update the first matching document, or insert one seeded from the
    /// filter's equality fields when nothing matches.
    async fn upsert(&self, collection: &str, filter: &Filter, update: Update)
        -> Result<(), CoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError>;

    /// Idempotently create one single-field ascending index per field.
    async fn create_indexes(&self, collection: &str, fields: &[&str]) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Serialize a model into a document. Non-object values are rejected.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, CoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CoreError::Internal(format!(
            "Expected a JSON object, got {other}"
        ))),
        Err(e) => Err(CoreError::Internal(format!("Serialization failed: {e}"))),
    }
}

/// Decode a stored document into a model. `key` identifies the document in
/// the resulting [`CoreError::Corrupt`].
pub fn from_document<T: DeserializeOwned>(key: &str, doc: Document) -> Result<T, CoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| CoreError::corrupt(key, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
