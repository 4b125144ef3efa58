use anyhow::Result;
use tracing::debug;

use crate::daemon::storage::event_store::EventStore;

use super::{EventProcessor, TrackedEvent};

/// Bridges [PollingCoordinator](crate::daemon::collection::coordinator::PollingCoordinator) and
/// [EventStore]. Every event is a single upsert, run on the blocking pool since DuckDB calls are
/// synchronous.
pub struct StoreWriter {
    store: EventStore,
}

impl StoreWriter {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    fn write(store: &EventStore, event: TrackedEvent) -> Result<()> {
        match event {
            TrackedEvent::Window {
                timestamp,
                logical_date,
                window,
            } => store.upsert_window_event(
                timestamp,
                &window.app_name,
                logical_date,
                window.window_title.as_deref(),
                window.browser_url.as_deref(),
            )?,
            TrackedEvent::Keys {
                timestamp,
                logical_date,
                count,
            } => store.upsert_key_event(timestamp, count, logical_date)?,
        }
        Ok(())
    }
}

impl EventProcessor for StoreWriter {
    async fn process_next(&mut self, event: TrackedEvent) -> Result<()> {
        debug!("Writing {:?}", event);
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || Self::write(&store, event)).await?
    }

    async fn finalize(&mut self) -> Result<()> {
        debug!("Store writer finished");
        Ok(())
    }
}
