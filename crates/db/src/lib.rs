//! Persistence for jobwatch: the document-store contract and its adapters,
//! the stored models, and the repositories built on top of them.

use sqlx::postgres::PgPoolOptions;

pub mod document;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repositories;

pub use document::DocumentStore;
pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool can reach the server.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
