use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use chrono::{DateTime, Days, NaiveDate, Utc};
use duckdb::{params, AccessMode, Config, Connection};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::utils::time::date_to_string;

use super::{
    entities::{KeyEvent, Note, WindowEvent},
    error::{StoreError, StoreResult},
    schema::ensure_schema,
};

const OPEN_ATTEMPTS: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Access {
    ReadWrite,
    ReadOnly,
}

/// DuckDB backed storage of tracked events.
///
/// The store doesn't keep a connection around. Every operation opens the file, runs a single
/// transaction and closes it again, so a reader process (the cli) only ever waits for one short
/// write of the daemon.
#[derive(Debug, Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    /// Opens or creates a store at `path`. Parent directories are created when missing.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { path };
        let conn = store.connect(Access::ReadWrite)?;
        ensure_schema(&conn)?;
        debug!("Opened store at {:?}", store.path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn connect(&self, access: Access) -> StoreResult<Connection> {
        let mut attempt = 1;
        loop {
            match self.open_connection(access) {
                Ok(conn) => return Ok(conn),
                Err(source) if attempt >= OPEN_ATTEMPTS => {
                    return Err(StoreError::Unavailable {
                        path: self.path.clone(),
                        source,
                    })
                }
                Err(e) => {
                    debug!("Store busy on attempt {attempt}: {e}");
                    attempt += 1;
                    thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }

    fn open_connection(&self, access: Access) -> duckdb::Result<Connection> {
        let mode = match access {
            Access::ReadWrite => AccessMode::ReadWrite,
            Access::ReadOnly => AccessMode::ReadOnly,
        };
        let config = Config::default().access_mode(mode)?.threads(1)?;
        Connection::open_with_flags(&self.path, config)
    }

    #[instrument(skip(self, window_title, browser_url))]
    pub fn upsert_window_event(
        &self,
        timestamp: DateTime<Utc>,
        app_name: &str,
        logical_date: NaiveDate,
        window_title: Option<&str>,
        browser_url: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.connect(Access::ReadWrite)?;
        conn.execute(
            r#"
            INSERT INTO window_events (timestamp, app_name, window_title, browser_url, logical_date)
            VALUES (?, ?, ?, ?, CAST(? AS DATE))
            ON CONFLICT (timestamp, app_name) DO UPDATE SET
                window_title = excluded.window_title,
                browser_url = excluded.browser_url
            "#,
            params![
                timestamp.timestamp(),
                app_name,
                window_title,
                browser_url,
                date_to_string(logical_date),
            ],
        )?;
        Ok(())
    }

    /// Adds `key_count` to the row at `timestamp`. The merge happens inside the statement, so
    /// counts from overlapping writers are summed rather than overwritten.
    #[instrument(skip(self))]
    pub fn upsert_key_event(
        &self,
        timestamp: DateTime<Utc>,
        key_count: u64,
        logical_date: NaiveDate,
    ) -> StoreResult<()> {
        let count = i64::try_from(key_count).map_err(|_| StoreError::InvalidValue {
            column: "key_count",
            value: key_count.to_string(),
        })?;
        let conn = self.connect(Access::ReadWrite)?;
        conn.execute(
            r#"
            INSERT INTO key_events (timestamp, key_count, logical_date)
            VALUES (?, ?, CAST(? AS DATE))
            ON CONFLICT (timestamp) DO UPDATE SET
                key_count = key_events.key_count + excluded.key_count
            "#,
            params![timestamp.timestamp(), count, date_to_string(logical_date)],
        )?;
        Ok(())
    }

    #[instrument(skip(self, content))]
    pub fn upsert_note(
        &self,
        timestamp: DateTime<Utc>,
        content: &str,
        logical_date: NaiveDate,
    ) -> StoreResult<()> {
        let conn = self.connect(Access::ReadWrite)?;
        conn.execute(
            r#"
            INSERT INTO notes (timestamp, content, logical_date)
            VALUES (?, ?, CAST(? AS DATE))
            ON CONFLICT (timestamp) DO UPDATE SET content = excluded.content
            "#,
            params![timestamp.timestamp(), content, date_to_string(logical_date)],
        )?;
        Ok(())
    }

    pub fn save_blog(&self, logical_date: NaiveDate, content: &str) -> StoreResult<()> {
        let conn = self.connect(Access::ReadWrite)?;
        conn.execute(
            r#"
            INSERT INTO daily_blog (logical_date, content)
            VALUES (CAST(? AS DATE), ?)
            ON CONFLICT (logical_date) DO UPDATE SET content = excluded.content
            "#,
            params![date_to_string(logical_date), content],
        )?;
        Ok(())
    }

    pub fn get_blog(&self, logical_date: NaiveDate) -> StoreResult<Option<String>> {
        let conn = self.connect(Access::ReadOnly)?;
        let result = conn.query_row(
            "SELECT content FROM daily_blog WHERE logical_date = CAST(? AS DATE)",
            params![date_to_string(logical_date)],
            |row| row.get::<_, String>(0),
        );
        optional(result)
    }

    /// Reads a setting. Values are stored as JSON so any serde type works.
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let conn = self.connect(Access::ReadOnly)?;
        let result = conn.query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        );
        optional(result)?
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    pub fn set_setting<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        let conn = self.connect(Access::ReadWrite)?;
        conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
            params![key, raw],
        )?;
        Ok(())
    }

    pub fn window_events_for_date(&self, logical_date: NaiveDate) -> StoreResult<Vec<WindowEvent>> {
        let conn = self.connect(Access::ReadOnly)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, app_name, window_title, browser_url
            FROM window_events
            WHERE logical_date = CAST(? AS DATE)
            ORDER BY timestamp
            "#,
        )?;
        let rows = stmt
            .query_map(params![date_to_string(logical_date)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(timestamp, app_name, window_title, browser_url)| {
                Ok(WindowEvent {
                    timestamp: from_unix(timestamp)?,
                    app_name,
                    window_title,
                    browser_url,
                    logical_date,
                })
            })
            .collect()
    }

    pub fn key_events_for_date(&self, logical_date: NaiveDate) -> StoreResult<Vec<KeyEvent>> {
        let conn = self.connect(Access::ReadOnly)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, key_count
            FROM key_events
            WHERE logical_date = CAST(? AS DATE)
            ORDER BY timestamp
            "#,
        )?;
        let rows = stmt
            .query_map(params![date_to_string(logical_date)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(timestamp, key_count)| {
                Ok(KeyEvent {
                    timestamp: from_unix(timestamp)?,
                    key_count: u64::try_from(key_count).map_err(|_| StoreError::InvalidValue {
                        column: "key_count",
                        value: key_count.to_string(),
                    })?,
                    logical_date,
                })
            })
            .collect()
    }

    pub fn notes_for_date(&self, logical_date: NaiveDate) -> StoreResult<Vec<Note>> {
        let conn = self.connect(Access::ReadOnly)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, content
            FROM notes
            WHERE logical_date = CAST(? AS DATE)
            ORDER BY timestamp
            "#,
        )?;
        let rows = stmt
            .query_map(params![date_to_string(logical_date)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(timestamp, content)| {
                Ok(Note {
                    timestamp: from_unix(timestamp)?,
                    content,
                    logical_date,
                })
            })
            .collect()
    }

    /// Most recent focus change across all days.
    pub fn last_window_event(&self) -> StoreResult<Option<WindowEvent>> {
        let conn = self.connect(Access::ReadOnly)?;
        let result = conn.query_row(
            r#"
            SELECT timestamp, app_name, window_title, browser_url, CAST(logical_date AS VARCHAR)
            FROM window_events
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        );

        optional(result)?
            .map(
                |(timestamp, app_name, window_title, browser_url, logical_date)| {
                    Ok(WindowEvent {
                        timestamp: from_unix(timestamp)?,
                        app_name,
                        window_title,
                        browser_url,
                        logical_date: parse_date(&logical_date)?,
                    })
                },
            )
            .transpose()
    }

    /// Dates that have at least one window or key event, newest first.
    pub fn available_dates(&self) -> StoreResult<Vec<NaiveDate>> {
        let conn = self.connect(Access::ReadOnly)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT CAST(logical_date AS VARCHAR)
            FROM (
                SELECT logical_date FROM window_events
                UNION
                SELECT logical_date FROM key_events
            )
            ORDER BY logical_date DESC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|v| parse_date(v)).collect()
    }

    /// Deletes window, key and note rows whose logical date is more than `retention_days` before
    /// `today`. A retention of zero keeps everything. Returns the number of removed rows.
    #[instrument(skip(self))]
    pub fn purge_older_than(&self, retention_days: u32, today: NaiveDate) -> StoreResult<u64> {
        if retention_days == 0 {
            return Ok(0);
        }
        let Some(cutoff) = today.checked_sub_days(Days::new(retention_days.into())) else {
            warn!("Retention of {retention_days} days reaches before the calendar start");
            return Ok(0);
        };
        let cutoff = date_to_string(cutoff);

        let mut conn = self.connect(Access::ReadWrite)?;
        let tx = conn.transaction()?;
        let mut purged = 0;
        for table in ["window_events", "key_events", "notes"] {
            let removed = tx.execute(
                &format!("DELETE FROM {table} WHERE logical_date < CAST(? AS DATE)"),
                params![cutoff],
            )?;
            debug!("Purged {removed} rows from {table}");
            purged += removed as u64;
        }
        tx.commit()?;

        if purged > 0 {
            info!("Purged {purged} rows older than {cutoff}");
        }
        Ok(purged)
    }
}

pub(super) fn optional<T>(result: duckdb::Result<T>) -> StoreResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(super) fn from_unix(seconds: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| StoreError::InvalidValue {
        column: "timestamp",
        value: seconds.to_string(),
    })
}

pub(super) fn parse_date(value: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| StoreError::InvalidValue {
        column: "logical_date",
        value: value.to_string(),
    })
}
