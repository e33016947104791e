//! Repositories over the [`DocumentStore`](crate::document::DocumentStore)
//! collections.

pub mod job_log_repo;
pub mod node_repo;

pub use job_log_repo::JobLogStore;
pub use node_repo::NodeRepo;
