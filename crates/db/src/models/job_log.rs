//! Job execution records, the latest-result projection and execution
//! counters.

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::NaiveDate;
use jobwatch_core::calendar;
use jobwatch_core::types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::document::Filter;

// ---------------------------------------------------------------------------
// Collections and field names
// ---------------------------------------------------------------------------

/// Append-only execution history.
pub const COLL_JOB_LOG: &str = "jobwatch_job_log";

/// One row per (node, hostname, ip, job id, job group).
pub const COLL_JOB_LATEST_LOG: &str = "jobwatch_job_latest_log";

/// All-time and per-day execution counters.
pub const COLL_STAT: &str = "jobwatch_stat";

/// Counter name of the all-time counter.
pub const STAT_ALL_TIME: &str = "job";

/// Counter name of the per-day counters; each also carries a `date`.
pub const STAT_DAILY: &str = "job-day";

/// Fields dropped from every list view.
pub const LIST_EXCLUDED_FIELDS: [&str; 2] = ["command", "output"];

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// One completed (or failed) job run.
///
/// Immutable once written except for `cleanup`, which a retention-policy
/// update may set later. `command` and `output` are empty in list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    /// Empty until the log store assigns one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub job_id: String,
    pub job_group: String,
    /// User that triggered the run.
    pub user: String,
    /// Job display name.
    pub name: String,
    /// Id of the node that ran the job.
    pub node: String,
    pub hostname: String,
    pub ip: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub output: String,
    pub success: bool,
    #[serde(with = "ts_milliseconds")]
    pub begin_time: Timestamp,
    #[serde(with = "ts_milliseconds")]
    pub end_time: Timestamp,
    /// When set, the record becomes eligible for deletion at this instant
    /// regardless of the retention window.
    #[serde(
        default,
        with = "ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub cleanup: Option<Timestamp>,
}

/// Denormalized copy of the most recently written record for one
/// (node, hostname, ip, job id, job group) tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestExecutionProjection {
    #[serde(flatten)]
    pub record: JobExecutionRecord,
    /// Id of the [`JobExecutionRecord`] this row was copied from.
    pub ref_log_id: String,
}

impl LatestExecutionProjection {
    /// Build the projection row for a freshly written record.
    pub fn from_record(record: &JobExecutionRecord) -> Self {
        let mut copy = record.clone();
        copy.id = String::new();
        Self {
            record: copy,
            ref_log_id: record.id.clone(),
        }
    }

    /// Filter selecting the row for this record's tuple.
    pub fn tuple_filter(record: &JobExecutionRecord) -> Filter {
        Filter::And(vec![
            Filter::eq("node", record.node.as_str()),
            Filter::eq("hostname", record.hostname.as_str()),
            Filter::eq("ip", record.ip.as_str()),
            Filter::eq("job_id", record.job_id.as_str()),
            Filter::eq("job_group", record.job_group.as_str()),
        ])
    }

    /// Reshape into an execution record whose id is the referenced record.
    pub fn into_record(self) -> JobExecutionRecord {
        let mut record = self.record;
        record.id = self.ref_log_id;
        record
    }
}

/// Total / success / failure tallies, all-time or for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatCounter {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub successed: i64,
    #[serde(default)]
    pub failed: i64,
    /// `YYYY-MM-DD` for day counters, absent for the all-time counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl ExecutionStatCounter {
    /// Zero-valued counter carrying only a date.
    pub fn empty_day(date: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            ..Self::default()
        }
    }

    /// Add another counter's tallies into this one.
    pub fn absorb(&mut self, other: &ExecutionStatCounter) {
        self.total += other.total;
        self.successed += other.successed;
        self.failed += other.failed;
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Filters accepted by [`JobLogStore::list`](crate::repositories::JobLogStore::list).
///
/// Empty lists and `None` impose no constraint.
#[derive(Debug, Clone, Default)]
pub struct JobLogQuery {
    /// Case-insensitive substrings matched against `hostname`.
    pub hostnames: Vec<String>,
    /// Case-insensitive substrings matched against the job `name`.
    pub names: Vec<String>,
    /// Exact IP addresses.
    pub ips: Vec<String>,
    /// Exact job ids.
    pub job_ids: Vec<String>,
    /// Runs that began on or after the start of this UTC day.
    pub begin: Option<NaiveDate>,
    /// Runs that ended no later than the end of this UTC day.
    pub end: Option<NaiveDate>,
    /// `Some(false)` keeps only failures, `Some(true)` only successes.
    pub success: Option<bool>,
    /// Read the latest-result projection instead of the full history.
    pub latest: bool,
}

impl JobLogQuery {
    /// Translate into a document filter.
    ///
    /// Keyword matches across hostnames and names are OR-combined with each
    /// other and AND-combined with every other constraint.
    pub fn to_filter(&self) -> Filter {
        let mut clauses = Vec::new();

        let keywords: Vec<Filter> = keyword_filters("hostname", &self.hostnames)
            .chain(keyword_filters("name", &self.names))
            .collect();

        if !self.ips.is_empty() {
            clauses.push(Filter::is_in("ip", self.ips.iter().cloned()));
        }
        if !self.job_ids.is_empty() {
            clauses.push(Filter::is_in("job_id", self.job_ids.iter().cloned()));
        }
        if let Some(begin) = self.begin {
            clauses.push(Filter::gte(
                "begin_time",
                calendar::start_of_day(begin).timestamp_millis(),
            ));
        }
        if let Some(end) = self.end {
            clauses.push(Filter::lt(
                "end_time",
                calendar::start_of_next_day(end).timestamp_millis(),
            ));
        }
        if let Some(success) = self.success {
            clauses.push(Filter::eq("success", success));
        }
        if !keywords.is_empty() {
            clauses.push(Filter::Or(keywords));
        }

        if clauses.is_empty() {
            Filter::All
        } else {
            Filter::And(clauses)
        }
    }
}

fn keyword_filters<'a>(field: &'a str, keywords: &'a [String]) -> impl Iterator<Item = Filter> + 'a {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(move |k| Filter::matches(field, regex::escape(k)))
}

/// One page of list results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListPage {
    pub items: Vec<JobExecutionRecord>,
    /// Matching records before pagination.
    pub total: u64,
}

impl ListPage {
    /// Number of pages of `page_size` needed to show `total` records.
    pub fn page_count(&self, page_size: u64) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(page_size)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
