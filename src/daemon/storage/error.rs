use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by [EventStore](super::event_store::EventStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file couldn't be opened. Usually means another process holds it for a moment.
    #[error("store at {path:?} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: duckdb::Error,
    },

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store has schema version {found}, newest supported is {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

impl StoreError {
    /// Transient errors are worth retrying after a pause. Everything else points at bad data or a
    /// bad query and retrying won't change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Io(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
