pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::MemoryError;

/// The single connection shared by the engine, its workers and the CLI.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Run a store operation on the blocking pool, holding the lock only for `f`.
pub async fn with_connection<T, F>(db: &SharedConnection, f: F) -> crate::error::Result<T>
where
    F: FnOnce(&mut Connection) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|e| MemoryError::StoreUnavailable(format!("db lock poisoned: {e}")))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| MemoryError::StoreUnavailable(format!("db task failed: {e}")))?
}

/// Open (or create) the Memoria database at the given path with schema
/// initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL keeps readers off the writer's back; NORMAL is durable at commit under WAL.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_millis(5000))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database (tests, dry runs).
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Result of [`check_database_health`].
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub schema_version: u32,
    pub atom_count: u64,
    pub connection_count: u64,
    pub log_count: u64,
    pub dangling_connections: u64,
}

/// Run SQLite's integrity check and collect basic counts.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let schema_version = migrations::get_schema_version(conn)?;

    let count = |sql: &str| -> Result<u64> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    };

    Ok(HealthReport {
        integrity_ok: integrity == "ok",
        schema_version,
        atom_count: count("SELECT COUNT(*) FROM atoms")?,
        connection_count: count("SELECT COUNT(*) FROM atom_connections")?,
        log_count: count("SELECT COUNT(*) FROM memory_log")?,
        dangling_connections: count(
            "SELECT COUNT(*) FROM atom_connections c \
             LEFT JOIN atoms a ON a.id = c.target_id WHERE a.id IS NULL",
        )?,
    })
}
