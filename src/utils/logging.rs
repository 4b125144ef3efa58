use std::{path::PathBuf, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::MakeWriterExt},
    EnvFilter,
};

use super::dir::create_application_default_path;

/// Crates whose events end up in the logs. The daemon binary is its own crate.
const LOGGED_CRATES: [&str; 2] = ["daybook", "daybook_daemon"];

/// Which process is writing. Each gets its own set of log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Cli,
    Daemon,
}

impl LogTarget {
    fn file_prefix(self) -> &'static str {
        match self {
            LogTarget::Cli => "cli",
            LogTarget::Daemon => "daemon",
        }
    }
}

/// Logs live in `<data dir>/logs`.
pub fn log_directory() -> Result<PathBuf> {
    Ok(create_application_default_path()?.join("logs"))
}

fn filter(log_level: Option<LevelFilter>) -> EnvFilter {
    let level = log_level
        .map(|v| v.to_string())
        .unwrap_or_else(|| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let directives = LOGGED_CRATES
        .iter()
        .map(|name| format!("{name}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(directives)
}

/// Sets up daily rolling log files for `target`. Console output is only produced when
/// `show_std` is set, since the daemon normally runs detached.
pub fn enable_logging(
    target: LogTarget,
    log_level: Option<LevelFilter>,
    show_std: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix(target.file_prefix())
        .build(log_directory()?)?;

    let stdout = std::io::stdout.with_filter(move |_| show_std);

    tracing_subscriber::fmt()
        .with_env_filter(filter(log_level))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(stdout.and(appender))
        .pretty()
        .init();
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .try_init();
});
