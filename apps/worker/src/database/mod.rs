/// Database abstraction layer
///
/// Websites, users and visitor tokens live in a LibSQL (SQLite) database
/// reached through a deadpool connection pool.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
