//! PostgreSQL-backed [`DocumentStore`].
//!
//! All collections share the `documents` table: one JSONB `doc` per row,
//! partitioned by the `collection` column. Field names are inlined as quoted
//! literals (`doc -> 'field'`) so expression indexes created by
//! [`create_indexes`](DocumentStore::create_indexes) can serve the queries;
//! every value is a bound parameter.
//!
//! Upserts into the projection and counter collections are backed by
//! partial unique indexes; an upsert that loses the insert race to a
//! concurrent writer is retried once and then updates the winner's row.

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

use crate::document::{Document, DocumentStore, Filter, FindOptions, SortOrder, Update};
use crate::DbPool;

/// Document store over the `documents` table.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: DbPool,
}

impl PgDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Attempts per upsert; the second one finds the row a concurrent insert won.
const UPSERT_ATTEMPTS: u32 = 2;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ---------------------------------------------------------------------------
// SQL fragments
// ---------------------------------------------------------------------------

/// Quote `s` as a SQL string literal.
fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// JSONB accessor for a top-level field of `column`.
fn field_expr(column: &str, field: &str) -> String {
    format!("({column} -> {})", quote_literal(field))
}

/// Restrict an identifier fragment to `[a-z0-9_]`.
fn sanitize_ident(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Append `filter` as a boolean SQL expression over `column`.
pub(crate) fn push_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, column: &str, filter: &Filter) {
    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::Eq(field, Value::Null) => {
            let expr = field_expr(column, field);
            qb.push(format!("({expr} IS NULL OR {expr} = 'null'::jsonb)"));
        }
        Filter::Eq(field, value) => {
            qb.push(field_expr(column, field));
            qb.push(" = ");
            qb.push_bind(value.clone());
        }
        Filter::In(_, values) if values.is_empty() => {
            qb.push("FALSE");
        }
        Filter::In(field, values) => {
            qb.push(field_expr(column, field));
            qb.push(" IN (");
            let mut list = qb.separated(", ");
            for value in values {
                list.push_bind(value.clone());
            }
            list.push_unseparated(")");
        }
        Filter::Gte(field, value) => push_comparison(qb, column, field, ">=", value),
        Filter::Lt(field, value) => push_comparison(qb, column, field, "<", value),
        Filter::Lte(field, value) => push_comparison(qb, column, field, "<=", value),
        Filter::Exists(field, present) => {
            if !present {
                qb.push("NOT ");
            }
            qb.push(format!("jsonb_exists({column}, {})", quote_literal(field)));
        }
        Filter::Matches(field, pattern) => {
            qb.push(format!("({column} ->> {}) ~* ", quote_literal(field)));
            qb.push_bind(pattern.clone());
        }
        Filter::And(filters) => push_junction(qb, column, filters, " AND ", "TRUE"),
        Filter::Or(filters) => push_junction(qb, column, filters, " OR ", "FALSE"),
    }
}

fn push_comparison<'a>(
    qb: &mut QueryBuilder<'a, Postgres>,
    column: &str,
    field: &str,
    op: &str,
    value: &Value,
) {
    qb.push(format!("{} {op} ", field_expr(column, field)));
    qb.push_bind(value.clone());
}

fn push_junction<'a>(
    qb: &mut QueryBuilder<'a, Postgres>,
    column: &str,
    filters: &[Filter],
    joiner: &str,
    empty: &str,
) {
    if filters.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, f) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        push_filter(qb, column, f);
    }
    qb.push(")");
}

/// Append the new value of `column` after applying `update`.
pub(crate) fn push_update<'a>(qb: &mut QueryBuilder<'a, Postgres>, column: &str, update: &Update) {
    match update {
        Update::Set(fields) => {
            qb.push(format!("{column} || "));
            qb.push_bind(Value::Object(fields.clone()));
        }
        Update::Inc(deltas) if deltas.is_empty() => {
            qb.push(column);
        }
        Update::Inc(deltas) => {
            qb.push(format!("{column} || jsonb_build_object("));
            for (i, (field, delta)) in deltas.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                let key = quote_literal(field);
                qb.push(format!("{key}, COALESCE(({column} ->> {key})::bigint, 0) + "));
                qb.push_bind(*delta);
            }
            qb.push(")");
        }
    }
}

fn push_scope<'a>(qb: &mut QueryBuilder<'a, Postgres>, collection: &str, filter: &Filter) {
    qb.push("collection = ");
    qb.push_bind(collection.to_string());
    qb.push(" AND ");
    push_filter(qb, "doc", filter);
}

pub(crate) fn find_query<'a>(
    collection: &str,
    filter: &Filter,
    options: &FindOptions,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    if options.exclude.is_empty() {
        qb.push("doc");
    } else {
        qb.push("doc - ");
        qb.push_bind(options.exclude.clone());
        qb.push("::text[]");
    }
    qb.push(" FROM documents WHERE ");
    push_scope(&mut qb, collection, filter);

    qb.push(" ORDER BY ");
    for key in &options.sort {
        let direction = match key.order {
            SortOrder::Asc => "ASC NULLS FIRST",
            SortOrder::Desc => "DESC NULLS LAST",
        };
        qb.push(format!("{} {direction}, ", field_expr("doc", &key.field)));
    }
    qb.push("id ASC");

    if options.skip > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(options.skip).unwrap_or(i64::MAX));
    }
    if let Some(limit) = options.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    qb
}

pub(crate) fn upsert_query<'a>(
    collection: &str,
    filter: &Filter,
    update: &Update,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new("WITH target AS (SELECT id FROM documents WHERE ");
    push_scope(&mut qb, collection, filter);
    qb.push(
        " ORDER BY id LIMIT 1 FOR UPDATE), \
         updated AS (UPDATE documents d SET doc = ",
    );
    push_update(&mut qb, "d.doc", update);
    qb.push(
        ", updated_at = NOW() FROM target WHERE d.id = target.id RETURNING d.id) \
         INSERT INTO documents (collection, doc) SELECT ",
    );
    qb.push_bind(collection.to_string());
    qb.push(", ");
    qb.push_bind(Value::Object(update.seed(filter)));
    qb.push(" WHERE NOT EXISTS (SELECT 1 FROM updated)");
    qb
}

fn into_document(collection: &str, value: Value) -> Result<Document, CoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::corrupt(
            collection,
            format!("expected a JSON object, got {other}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// DocumentStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, CoreError> {
        let mut qb = find_query(collection, filter, options);
        let rows = qb
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::unavailable)?;

        rows.into_iter()
            .map(|v| into_document(collection, v))
            .collect()
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, CoreError> {
        let options = FindOptions::default().paged(0, 1);
        Ok(self
            .find(collection, filter, &options)
            .await?
            .into_iter()
            .next())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM documents WHERE ");
        push_scope(&mut qb, collection, filter);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::unavailable)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<(), CoreError> {
        if docs.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::new("INSERT INTO documents (collection, doc) ");
        qb.push_values(docs, |mut row, doc| {
            row.push_bind(collection.to_string())
                .push_bind(Value::Object(doc));
        });
        qb.build()
            .execute(&self.pool)
            .await
            .map_err(CoreError::unavailable)?;
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<u64, CoreError> {
        let mut qb = QueryBuilder::new("UPDATE documents SET doc = ");
        push_update(&mut qb, "doc", &Update::Set(fields));
        qb.push(", updated_at = NOW() WHERE ");
        push_scope(&mut qb, collection, filter);
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(CoreError::unavailable)?;
        Ok(result.rows_affected())
    }

    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        update: Update,
    ) -> Result<(), CoreError> {
        let mut attempt = 1;
        loop {
            let mut qb = upsert_query(collection, filter, &update);
            match qb.build().execute(&self.pool).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < UPSERT_ATTEMPTS && is_unique_violation(&e) => {
                    tracing::debug!(
                        error = %e,
                        collection,
                        "Upsert lost insert race, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(CoreError::unavailable(e)),
            }
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, CoreError> {
        let mut qb = QueryBuilder::new("DELETE FROM documents WHERE ");
        push_scope(&mut qb, collection, filter);
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(CoreError::unavailable)?;
        Ok(result.rows_affected())
    }

    async fn create_indexes(&self, collection: &str, fields: &[&str]) -> Result<(), CoreError> {
        for field in fields {
            let name = format!(
                "idx_documents_{}_{}",
                sanitize_ident(collection),
                sanitize_ident(field)
            );
            let ddl = format!(
                "CREATE INDEX IF NOT EXISTS {name} ON documents (collection, {})",
                field_expr("doc", field)
            );
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(CoreError::unavailable)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
