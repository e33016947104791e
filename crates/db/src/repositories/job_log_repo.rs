//! Job execution log store.
//!
//! Every completed run is written three ways: the append-only history row,
//! the latest-result projection for its (node, hostname, ip, job id, job
//! group) tuple, and the per-day plus all-time counters. The writes are
//! independent; a failure in one is logged and never blocks the others or
//! the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use jobwatch_core::calendar;
use jobwatch_core::error::CoreError;
use jobwatch_core::types::Timestamp;
use serde_json::Value;

use crate::document::{
    from_document, to_document, Document, DocumentStore, Filter, FindOptions, SortKey, Update,
};
use crate::models::job_log::{
    ExecutionStatCounter, JobExecutionRecord, JobLogQuery, LatestExecutionProjection, ListPage,
    COLL_JOB_LATEST_LOG, COLL_JOB_LOG, COLL_STAT, LIST_EXCLUDED_FIELDS, STAT_ALL_TIME, STAT_DAILY,
};

/// Indexed fields of the history collection.
const JOB_LOG_INDEXES: [&str; 3] = ["begin_time", "hostname", "ip"];

/// Indexed fields of the projection collection.
const LATEST_LOG_INDEXES: [&str; 3] = ["job_id", "node", "begin_time"];

/// Indexed fields of the counter collection.
const STAT_INDEXES: [&str; 2] = ["name", "date"];

/// Default list ordering: most recently started first.
fn default_sort() -> Vec<SortKey> {
    vec![SortKey::desc("begin_time")]
}

/// Generate a time-ordered record id.
pub fn new_record_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

fn stat_deltas(success: bool) -> Vec<(String, i64)> {
    let outcome = if success { "successed" } else { "failed" };
    vec![("total".to_string(), 1), (outcome.to_string(), 1)]
}

/// Projection rows replace prior content outright, so optional fields the
/// new record lacks are written as explicit nulls.
fn projection_fields(record: &JobExecutionRecord) -> Result<Document, CoreError> {
    let mut fields = to_document(&LatestExecutionProjection::from_record(record))?;
    fields.entry("cleanup").or_insert(Value::Null);
    Ok(fields)
}

/// Persistence for job execution history, projections and counters.
#[derive(Clone)]
pub struct JobLogStore {
    docs: Arc<dyn DocumentStore>,
}

impl JobLogStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Record one completed run and return its id.
    ///
    /// Assigns an id when unset. The history insert, the projection upsert
    /// and both counter increments run concurrently; each failure is logged
    /// and none is returned, so recording can never fail the job run itself.
    pub async fn record(&self, mut record: JobExecutionRecord) -> String {
        if record.id.is_empty() {
            record.id = new_record_id();
        }

        let today = calendar::day_key(Utc::now());
        let daily = Filter::And(vec![
            Filter::eq("name", STAT_DAILY),
            Filter::eq("date", today.as_str()),
        ]);
        let all_time = Filter::eq("name", STAT_ALL_TIME);
        let deltas = stat_deltas(record.success);

        let (inserted, projected, daily_counted, all_time_counted) = tokio::join!(
            self.insert_record(&record),
            self.upsert_projection(&record),
            self.docs
                .upsert(COLL_STAT, &daily, Update::Inc(deltas.clone())),
            self.docs.upsert(COLL_STAT, &all_time, Update::Inc(deltas)),
        );

        if let Err(e) = inserted {
            tracing::error!(
                error = %e,
                record_id = %record.id,
                job_id = %record.job_id,
                "Failed to insert job execution record"
            );
        }
        if let Err(e) = projected {
            tracing::error!(
                error = %e,
                record_id = %record.id,
                job_id = %record.job_id,
                node = %record.node,
                "Failed to upsert latest execution projection"
            );
        }
        if let Err(e) = daily_counted {
            tracing::error!(error = %e, date = %today, "Failed to increase stat.job-day");
        }
        if let Err(e) = all_time_counted {
            tracing::error!(error = %e, "Failed to increase stat.job");
        }

        record.id
    }

    async fn insert_record(&self, record: &JobExecutionRecord) -> Result<(), CoreError> {
        let doc = to_document(record)?;
        self.docs.insert_many(COLL_JOB_LOG, vec![doc]).await
    }

    async fn upsert_projection(&self, record: &JobExecutionRecord) -> Result<(), CoreError> {
        let fields = projection_fields(record)?;
        self.docs
            .upsert(
                COLL_JOB_LATEST_LOG,
                &LatestExecutionProjection::tuple_filter(record),
                Update::Set(fields),
            )
            .await
    }

    /// Mark every record of `job_id` for deletion at `at`. Returns the number
    /// of records updated.
    pub async fn set_cleanup_for_job(
        &self,
        job_id: &str,
        at: Timestamp,
    ) -> Result<u64, CoreError> {
        let mut fields = Document::new();
        fields.insert("cleanup".to_string(), Value::from(at.timestamp_millis()));
        self.docs
            .update_many(COLL_JOB_LOG, &Filter::eq("job_id", job_id), fields)
            .await
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Point lookup including command and output.
    pub async fn get_by_id(&self, id: &str) -> Result<JobExecutionRecord, CoreError> {
        let doc = self
            .docs
            .find_one(COLL_JOB_LOG, &Filter::eq("id", id))
            .await?
            .ok_or_else(|| CoreError::not_found("job log", id))?;
        from_document(&format!("{COLL_JOB_LOG}/{id}"), doc)
    }

    /// One page of records matching `query`.
    ///
    /// `page` is 1-indexed (0 is treated as 1). An empty `sort` orders by
    /// begin time, newest first. `total` counts every match before
    /// pagination. Command and output are never included. With
    /// `query.latest` the projection rows are returned, each carrying the id
    /// of the record it was copied from.
    pub async fn list(
        &self,
        query: &JobLogQuery,
        page: u64,
        page_size: u64,
        sort: &[SortKey],
    ) -> Result<ListPage, CoreError> {
        if page_size == 0 {
            return Err(CoreError::Validation(
                "Page size must be greater than zero".to_string(),
            ));
        }

        let page = page.max(1);
        let filter = query.to_filter();
        let collection = if query.latest {
            COLL_JOB_LATEST_LOG
        } else {
            COLL_JOB_LOG
        };

        let total = self.docs.count(collection, &filter).await?;

        let sort = if sort.is_empty() {
            default_sort()
        } else {
            sort.to_vec()
        };
        let options = FindOptions::sorted(sort)
            .excluding(&LIST_EXCLUDED_FIELDS)
            .paged((page - 1).saturating_mul(page_size), page_size);
        let docs = self.docs.find(collection, &filter, &options).await?;

        let items = if query.latest {
            docs.into_iter()
                .map(|doc| {
                    from_document::<LatestExecutionProjection>(COLL_JOB_LATEST_LOG, doc)
                        .map(LatestExecutionProjection::into_record)
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            docs.into_iter()
                .map(|doc| from_document(COLL_JOB_LOG, doc))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(ListPage { items, total })
    }

    /// Latest projection per job id.
    ///
    /// Rows are read in ascending begin-time order and folded into the map,
    /// so when several nodes ran the same job the row with the latest begin
    /// time wins. An empty `job_ids` reads every job.
    pub async fn latest_by_job_ids(
        &self,
        job_ids: &[String],
    ) -> Result<HashMap<String, LatestExecutionProjection>, CoreError> {
        let filter = if job_ids.is_empty() {
            Filter::All
        } else {
            Filter::is_in("job_id", job_ids.iter().cloned())
        };
        let options = FindOptions::sorted(vec![SortKey::asc("begin_time")])
            .excluding(&LIST_EXCLUDED_FIELDS);

        let docs = self.docs.find(COLL_JOB_LATEST_LOG, &filter, &options).await?;

        let mut latest = HashMap::with_capacity(docs.len());
        for doc in docs {
            let row: LatestExecutionProjection = from_document(COLL_JOB_LATEST_LOG, doc)?;
            latest.insert(row.record.job_id.clone(), row);
        }
        Ok(latest)
    }

    /// The all-time counter; zero when nothing has been recorded yet.
    pub async fn stats(&self) -> Result<ExecutionStatCounter, CoreError> {
        let docs = self
            .docs
            .find(COLL_STAT, &Filter::eq("name", STAT_ALL_TIME), &FindOptions::default())
            .await?;

        let mut total = ExecutionStatCounter::default();
        for doc in docs {
            let counter: ExecutionStatCounter = from_document(COLL_STAT, doc)?;
            total.absorb(&counter);
        }
        Ok(total)
    }

    /// One counter per UTC day in `[begin, end]`, ascending, with zero
    /// counters for days that have no data.
    pub async fn daily_stats(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExecutionStatCounter>, CoreError> {
        let dates: Vec<String> = calendar::days_inclusive(begin, end)?
            .into_iter()
            .map(calendar::format_day)
            .collect();

        let filter = Filter::And(vec![
            Filter::eq("name", STAT_DAILY),
            Filter::is_in("date", dates.iter().cloned()),
        ]);
        let docs = self
            .docs
            .find(COLL_STAT, &filter, &FindOptions::sorted(vec![SortKey::asc("date")]))
            .await?;

        let mut by_date: HashMap<String, ExecutionStatCounter> = HashMap::new();
        for doc in docs {
            let counter: ExecutionStatCounter = from_document(COLL_STAT, doc)?;
            let Some(date) = counter.date.clone() else {
                continue;
            };
            by_date
                .entry(date.clone())
                .or_insert_with(|| ExecutionStatCounter::empty_day(date))
                .absorb(&counter);
        }

        Ok(dates
            .into_iter()
            .map(|date| {
                by_date
                    .remove(&date)
                    .unwrap_or_else(|| ExecutionStatCounter::empty_day(date))
            })
            .collect())
    }

    // ── Retention ────────────────────────────────────────────────────────

    /// Delete every record whose cleanup time has passed, and every record
    /// without a cleanup time that ended more than `retention` ago.
    ///
    /// Returns the number of records deleted.
    pub async fn sweep(&self, retention: Duration) -> Result<u64, CoreError> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| CoreError::Validation(format!("Retention window out of range: {e}")))?;
        let now = Utc::now();
        let cutoff = now.checked_sub_signed(retention).ok_or_else(|| {
            CoreError::Validation(format!(
                "Retention window of {} days reaches before the earliest representable time",
                retention.num_days()
            ))
        })?;

        let expired = Filter::Or(vec![
            Filter::And(vec![
                Filter::exists("cleanup", true),
                Filter::lte("cleanup", now.timestamp_millis()),
            ]),
            Filter::And(vec![
                Filter::exists("cleanup", false),
                Filter::lte("end_time", cutoff.timestamp_millis()),
            ]),
        ]);

        self.docs.delete_many(COLL_JOB_LOG, &expired).await
    }

    /// Create the secondary indexes the list and projection queries rely on.
    ///
    /// Idempotent. Failures are logged only.
    pub async fn ensure_indexes(&self) {
        let plan: [(&str, &[&str]); 3] = [
            (COLL_JOB_LOG, &JOB_LOG_INDEXES),
            (COLL_JOB_LATEST_LOG, &LATEST_LOG_INDEXES),
            (COLL_STAT, &STAT_INDEXES),
        ];

        for (collection, fields) in plan {
            match self.docs.create_indexes(collection, fields).await {
                Ok(()) => tracing::debug!(collection, "Indexes ensured"),
                Err(e) => {
                    tracing::error!(error = %e, collection, "Failed to create indexes");
                }
            }
        }
    }
}
