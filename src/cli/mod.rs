pub mod daemon_path;
pub mod process;
pub mod report;

use anyhow::Result;
use clap::{Parser, Subcommand};
use process::{print_status, start_daemon_process, stop_daemon};
use report::{ReportCommand, StoreArgs};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{args::TrackerArgs, start_daemon},
    utils::logging::{enable_logging, LogTarget},
};

#[derive(Parser, Debug)]
#[command(name = "daybook", version, long_about = None)]
#[command(about = "Records focused windows and keystroke counts", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long = "log-console", help = "Print logs to the console")]
    log_console: bool,
    #[arg(long = "log-filter", help = "Log level, overrides RUST_LOG")]
    log_filter: Option<LevelFilter>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon in the background")]
    Start {
        #[command(flatten)]
        tracker: TrackerArgs,
    },
    #[command(about = "Run the daemon directly in current console")]
    Serve {
        #[command(flatten)]
        tracker: TrackerArgs,
    },
    #[command(about = "Stop currently running daemon")]
    Stop {
        #[command(flatten)]
        store: StoreArgs,
    },
    #[command(about = "Show whether the daemon is running")]
    Status {
        #[command(flatten)]
        store: StoreArgs,
    },
    #[command(flatten)]
    Report(ReportCommand),
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let level = args
        .log_filter
        .or_else(|| args.log_console.then_some(LevelFilter::DEBUG));

    // Serving in a terminal should show what the daemon does.
    let serving = matches!(args.commands, Commands::Serve { .. });
    let target = if serving { LogTarget::Daemon } else { LogTarget::Cli };
    enable_logging(target, level, serving || args.log_console)?;

    match args.commands {
        Commands::Start { tracker } => start_daemon_process(tracker),
        Commands::Serve { tracker } => start_daemon(tracker.into_config()?).await,
        Commands::Stop { store } => stop_daemon(&store.database_path()?),
        Commands::Status { store } => print_status(&store.database_path()?),
        Commands::Report(command) => report::process_report_command(command),
    }
}
