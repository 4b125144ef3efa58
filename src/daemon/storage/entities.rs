use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A change of the focused window. Identified by `(timestamp, app_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEvent {
    pub timestamp: DateTime<Utc>,
    pub app_name: String,
    pub window_title: Option<String>,
    pub browser_url: Option<String>,
    pub logical_date: NaiveDate,
}

/// Number of keys pressed in the second starting at `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub timestamp: DateTime<Utc>,
    pub key_count: u64,
    pub logical_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub logical_date: NaiveDate,
}
