use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

use crate::window_api::FocusedWindow;

pub mod store_writer;

/// Something the coordinator observed during a tick, already stamped with time and logical
/// date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedEvent {
    Window {
        timestamp: DateTime<Utc>,
        logical_date: NaiveDate,
        window: FocusedWindow,
    },
    Keys {
        timestamp: DateTime<Utc>,
        logical_date: NaiveDate,
        count: u64,
    },
}

/// Represents an event processor. This is where the coordinator delivers sampled data; the
/// daemon writes it to the local store, tests collect it in memory.
pub trait EventProcessor {
    fn process_next(&mut self, event: TrackedEvent) -> impl Future<Output = Result<()>>;

    fn finalize(&mut self) -> impl Future<Output = Result<()>>;
}
