use anyhow::Result;

use crate::window_api::FocusedWindow;

pub mod coordinator;
pub mod focus;
pub mod keystrokes;

/// Produces at most one window observation per poll, only when focus changed.
#[cfg_attr(test, mockall::automock)]
pub trait WindowSampler: Send {
    fn poll(&mut self) -> Result<Option<FocusedWindow>>;

    /// Drops the remembered focus so the next poll reports the current window again. Used after
    /// an observation failed to persist.
    fn forget(&mut self);
}

/// Reports how many keys were pressed since the previous poll.
#[cfg_attr(test, mockall::automock)]
pub trait KeystrokeSampler: Send {
    fn poll(&mut self) -> Result<u64>;

    /// Returns a drained count that couldn't be persisted, so it is reported again.
    fn restore(&mut self, count: u64);
}
