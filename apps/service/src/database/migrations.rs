use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 3;

/// Run database migrations
///
/// This is the single source of truth for the database schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Tracks applied migrations
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
        tracing::info!(version = current_version, "Database schema is up to date");
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Monitors and heartbeats").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Settings and notifications").await?;
    }

    if current_version < 3 {
        run_migration_v3(conn).await?;
        record_migration(conn, 3, "Resend interval bookkeeping").await?;
    }

    tracing::info!(version = SCHEMA_VERSION, "Database migrations completed successfully");
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

/// Migration v1: monitors and the append-only heartbeat table
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL,
            monitor_type TEXT NOT NULL,
            url TEXT,
            hostname TEXT,
            port INTEGER,
            keyword TEXT,
            invert_keyword INTEGER NOT NULL DEFAULT 0,
            json_path TEXT,
            json_path_operator TEXT,
            expected_value TEXT,
            method TEXT NOT NULL DEFAULT 'GET',
            headers TEXT,
            body TEXT,
            http_body_encoding TEXT,
            basic_auth_user TEXT,
            basic_auth_pass TEXT,
            accepted_status_codes TEXT NOT NULL DEFAULT '[\"200-299\"]',
            max_redirects INTEGER NOT NULL DEFAULT 10,
            ignore_tls INTEGER NOT NULL DEFAULT 0,
            dns_resolve_type TEXT,
            dns_resolve_server TEXT,
            smtp_security TEXT,
            push_token TEXT UNIQUE,
            parent INTEGER REFERENCES monitors(id) ON DELETE SET NULL,
            interval_seconds INTEGER NOT NULL DEFAULT 60,
            retry_interval_seconds INTEGER NOT NULL DEFAULT 60,
            max_retries INTEGER NOT NULL DEFAULT 0,
            timeout_seconds REAL NOT NULL DEFAULT 0,
            upside_down INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // time is unix milliseconds
    conn.execute(
        "CREATE TABLE IF NOT EXISTS heartbeats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id INTEGER NOT NULL,
            time INTEGER NOT NULL,
            status INTEGER NOT NULL,
            msg TEXT NOT NULL DEFAULT '',
            ping INTEGER,
            duration INTEGER NOT NULL DEFAULT 0,
            important INTEGER NOT NULL DEFAULT 0,
            retries INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_active ON monitors(active)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_parent ON monitors(parent)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_heartbeats_monitor_time ON heartbeats(monitor_id, time DESC)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_heartbeats_time ON heartbeats(time)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_heartbeats_important ON heartbeats(monitor_id, important)", ()).await?;

    Ok(())
}

/// Migration v2: key/value settings and notification targets
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            provider TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_notifications (
            monitor_id INTEGER NOT NULL,
            notification_id INTEGER NOT NULL,
            PRIMARY KEY (monitor_id, notification_id),
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE,
            FOREIGN KEY (notification_id) REFERENCES notifications(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?, ?, ?)",
        libsql::params!["keepDataPeriodDays", "180", now],
    )
    .await?;

    tracing::info!("Added settings and notification tables");
    Ok(())
}

/// Migration v3: resend interval on monitors, consecutive DOWN counter on heartbeats
async fn run_migration_v3(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE monitors ADD COLUMN resend_interval INTEGER NOT NULL DEFAULT 0", ()).await?;
    conn.execute("ALTER TABLE heartbeats ADD COLUMN down_count INTEGER NOT NULL DEFAULT 0", ()).await?;

    tracing::info!("Added resend interval columns");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn migrations_are_idempotent() -> Result<()> {
        let temp_dir = tempdir()?;
        let db = libsql::Builder::new_local(temp_dir.path().join("migrate.db")).build().await?;
        let conn = db.connect()?;

        run_migrations(&conn).await?;
        run_migrations(&conn).await?;

        assert_eq!(get_current_version(&conn).await?, SCHEMA_VERSION);

        let mut rows = conn.query("SELECT value FROM settings WHERE key = 'keepDataPeriodDays'", ()).await?;
        let row = rows.next().await?.expect("default retention setting");
        assert_eq!(row.get::<String>(0)?, "180");
        Ok(())
    }
}
