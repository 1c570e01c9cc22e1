use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// This is the single source of truth for the worker's schema. Migrations are
/// recorded in `schema_migrations` and applied at most once.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Websites, users and visitor tokens").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Indexes for cycle and cleanup filters").await?;
    }

    tracing::info!(
        "Database migrations completed successfully (now at version {})",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: websites, users and visitor_tokens tables
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT,
            email TEXT
        )",
        (),
    )
    .await?;

    // ssl and seo hold the latest report as a JSON document
    conn.execute(
        "CREATE TABLE IF NOT EXISTS websites (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            name TEXT,
            user_id TEXT,
            visitor_token TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'unknown',
            response_time_ms INTEGER,
            last_checked_at INTEGER,
            ssl TEXT,
            seo TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS visitor_tokens (
            id TEXT PRIMARY KEY,
            token_id TEXT NOT NULL UNIQUE,
            expires_at INTEGER NOT NULL,
            is_expired INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: indexes backing the cycle and cleanup filters
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute("CREATE INDEX IF NOT EXISTS idx_websites_status ON websites(status)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_websites_visitor_token ON websites(visitor_token)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_websites_user_id ON websites(user_id)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visitor_tokens_expiry \
         ON visitor_tokens(is_expired, expires_at)",
        (),
    )
    .await?;
    Ok(())
}
