/// Database abstraction layer
///
/// One `Database` trait with two backends: libsql (SQLite) behind a
/// connection pool, and an in-memory store for tests and ephemeral runs.

pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use memory::MemoryDatabase;
pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
