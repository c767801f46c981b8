//! Database schema and version tracking.

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        // Fresh database - create all tables
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
///
/// `timestamp` holds unix microseconds (UTC).
fn create_schema_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            device_id TEXT NOT NULL CHECK (length(device_id) > 0),
            temperature REAL NOT NULL,
            humidity REAL NOT NULL,
            co_ppm REAL NOT NULL,
            h2_ppm REAL NOT NULL,
            butane_ppm REAL NOT NULL,
            alert INTEGER NOT NULL,
            co_alert INTEGER NOT NULL,
            butane_alert INTEGER NOT NULL,
            temperature_alert INTEGER NOT NULL,
            humidity_alert INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_device_time
            ON records(device_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_records_time
            ON records(timestamp);
        "#,
    )
}
