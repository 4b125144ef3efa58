//! Table definitions. Everything here is safe to run against an existing store.

use duckdb::{params, Connection};

use super::error::{StoreError, StoreResult};

/// Bumped whenever a table changes shape.
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

const CREATE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS window_events (
        timestamp BIGINT NOT NULL,
        app_name VARCHAR NOT NULL,
        window_title VARCHAR,
        browser_url VARCHAR,
        logical_date DATE NOT NULL,
        PRIMARY KEY (timestamp, app_name)
    );
    CREATE INDEX IF NOT EXISTS idx_window_logical_date ON window_events(logical_date);

    CREATE TABLE IF NOT EXISTS key_events (
        timestamp BIGINT NOT NULL PRIMARY KEY,
        key_count BIGINT NOT NULL,
        logical_date DATE NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_key_logical_date ON key_events(logical_date);

    CREATE TABLE IF NOT EXISTS notes (
        timestamp BIGINT NOT NULL PRIMARY KEY,
        content VARCHAR NOT NULL,
        logical_date DATE NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_notes_logical_date ON notes(logical_date);

    CREATE TABLE IF NOT EXISTS daily_blog (
        logical_date DATE PRIMARY KEY,
        content VARCHAR NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings (
        key VARCHAR PRIMARY KEY,
        value VARCHAR NOT NULL
    );
"#;

/// Creates missing tables and indexes and tags the schema version. Fails if the store was
/// written by a newer version of the application.
pub fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(CREATE_TABLES)?;

    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT (key) DO NOTHING",
        params![SCHEMA_VERSION_KEY, serde_json::to_string(&SCHEMA_VERSION)?],
    )?;

    let stored: String = conn.query_row(
        "SELECT value FROM settings WHERE key = ?",
        params![SCHEMA_VERSION_KEY],
        |row| row.get(0),
    )?;
    let found: i64 = serde_json::from_str(&stored)?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(())
}
