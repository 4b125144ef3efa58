use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::utils::{dir::default_database_path, time::DEFAULT_DAY_BOUNDARY_HOUR};

use super::config::TrackerConfig;

/// Options shared by every way of running the daemon.
#[derive(clap::Args, Debug, Clone)]
pub struct TrackerArgs {
    #[arg(
        long,
        help = "Store file. By default $XDG_STATE_HOME/daybook/daybook.duckdb or $HOME/.local/state/daybook/daybook.duckdb"
    )]
    pub db: Option<PathBuf>,
    #[arg(long = "poll-interval-ms", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: u64,
    #[arg(
        long = "day-boundary-hour",
        default_value_t = DEFAULT_DAY_BOUNDARY_HOUR,
        value_parser = clap::value_parser!(u32).range(0..=23),
        help = "Activity before this local hour counts towards the previous day"
    )]
    pub day_boundary_hour: u32,
    #[arg(
        long = "no-keystrokes",
        help = "Don't count keystrokes. Counts come from a keystroke hook feeding the counter; no hook is built in yet, so without one they stay at 0"
    )]
    pub no_keystrokes: bool,
    #[arg(
        long = "no-window-titles",
        help = "Record only which application has focus, without window titles or browser urls"
    )]
    pub no_window_titles: bool,
    #[arg(
        long = "retention-days",
        default_value_t = 0,
        help = "Delete events older than this many days on startup. 0 keeps everything"
    )]
    pub retention_days: u32,
    #[arg(long = "retry-backoff-ms", default_value_t = 5000)]
    pub retry_backoff_ms: u64,
}

impl TrackerArgs {
    pub fn into_config(self) -> Result<TrackerConfig> {
        let database_path = self.db.map_or_else(default_database_path, Ok)?;
        Ok(TrackerConfig {
            database_path,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            day_boundary_hour: self.day_boundary_hour,
            keystrokes: !self.no_keystrokes,
            window_titles: !self.no_window_titles,
            retention_days: self.retention_days,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        })
    }

    /// Flags to hand to a spawned daemon process so it runs with the same settings.
    pub fn to_command_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--poll-interval-ms={}", self.poll_interval_ms),
            format!("--day-boundary-hour={}", self.day_boundary_hour),
            format!("--retention-days={}", self.retention_days),
            format!("--retry-backoff-ms={}", self.retry_backoff_ms),
        ];
        if let Some(db) = &self.db {
            args.push(format!("--db={}", db.display()));
        }
        if self.no_keystrokes {
            args.push("--no-keystrokes".into());
        }
        if self.no_window_titles {
            args.push("--no-window-titles".into());
        }
        args
    }
}

#[derive(Parser)]
pub struct DaemonArgs {
    #[arg(long, help = "Stay attached to the terminal instead of daemonizing")]
    pub force: bool,
    #[command(flatten)]
    pub tracker: TrackerArgs,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
}
