/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Operating-system process id as stored in presence keys.
pub type Pid = i32;
