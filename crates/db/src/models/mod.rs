//! Stored models and their collection names.

pub mod job_log;
pub mod node;
