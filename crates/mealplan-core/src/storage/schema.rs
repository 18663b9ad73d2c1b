//! SQLite schema for the local store
//!
//! One table per cached entity type, the pending-change queue and the
//! temp-id map. Structured values (note items, a day's events) are stored as
//! JSON text since they are always read and replaced wholesale.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One note per date
        CREATE TABLE IF NOT EXISTS notes (
            date TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            items TEXT NOT NULL,
            updated_at TEXT
        );

        -- Unsent mutations, applied in id order
        CREATE TABLE IF NOT EXISTS pending_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pantry_items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS meal_ideas (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            updated_at TEXT
        );

        -- Local id -> server id, written once per confirmed add
        CREATE TABLE IF NOT EXISTS temp_id_map (
            temp_id TEXT PRIMARY KEY,
            real_id TEXT NOT NULL
        );

        -- Full (unfiltered) event list per date
        CREATE TABLE IF NOT EXISTS calendar_days (
            date TEXT PRIMARY KEY,
            events TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hidden_calendar_events (
            id TEXT PRIMARY KEY,
            event_uid TEXT NOT NULL,
            calendar_name TEXT NOT NULL,
            start_time TEXT NOT NULL,
            title TEXT NOT NULL
        );

        -- Hidden events are matched by (uid, calendar, start) rather than id
        CREATE INDEX IF NOT EXISTS idx_hidden_events_key
            ON hidden_calendar_events(event_uid, calendar_name, start_time);

        CREATE INDEX IF NOT EXISTS idx_pending_changes_date ON pending_changes(date);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
