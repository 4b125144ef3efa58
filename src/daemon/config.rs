use std::{path::PathBuf, time::Duration};

use super::{collection::coordinator::PollingSettings, instance::pid_file_for};

/// Everything the daemon needs to know to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub database_path: PathBuf,
    pub poll_interval: Duration,
    pub day_boundary_hour: u32,
    pub keystrokes: bool,
    /// Off keeps only the application name of each focus change.
    pub window_titles: bool,
    /// 0 disables purging.
    pub retention_days: u32,
    pub retry_backoff: Duration,
}

impl TrackerConfig {
    pub fn pid_file(&self) -> PathBuf {
        pid_file_for(&self.database_path)
    }

    pub fn polling_settings(&self) -> PollingSettings {
        PollingSettings {
            interval: self.poll_interval,
            retry_backoff: self.retry_backoff,
            day_boundary_hour: self.day_boundary_hour,
        }
    }
}
