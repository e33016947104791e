//! Shared key-value coordination store: the client contract, watch events
//! and the in-memory and PostgreSQL adapters.

pub mod client;
pub mod memory;
pub mod postgres;

pub use client::{CoordinationClient, KeyValue, WatchEvent, WatchStream};
pub use memory::MemoryCoordination;
pub use postgres::PgCoordination;
