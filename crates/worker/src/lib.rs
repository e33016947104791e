//! Worker-side liveness and housekeeping: the node registry, the log
//! retention scheduler and environment configuration.

pub mod background;
pub mod config;
pub mod registry;
