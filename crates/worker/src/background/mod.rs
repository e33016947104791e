//! Background tasks of the worker process.
//!
//! Each submodule provides a long-running async task intended to be spawned
//! via `tokio::spawn`, stopped through a [`CancellationToken`].
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod log_retention;
pub mod membership;
