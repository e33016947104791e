//! Shared building blocks for the jobwatch crates.
//!
//! Holds the error taxonomy, common type aliases, UTC calendar helpers and
//! the host-local process liveness probe. Has no internal dependencies.

pub mod calendar;
pub mod error;
pub mod host;
pub mod process;
pub mod types;
