//!  Storage is organized through [event_store::EventStore].
//!  The basic idea is:
//!   - A single DuckDB file holds every event, note, blog entry and setting.
//!   - Events are keyed by their timestamp and tagged with the logical date they belong to.
//!   - Writes are upserts, so repeating a write never creates duplicates.

pub mod aggregation;
pub mod entities;
pub mod error;
pub mod event_store;
pub mod schema;
