use std::{env::args, process::ExitCode};

use anyhow::Result;
use clap::Parser;
use daybook::{
    daemon::{args::DaemonArgs, config::TrackerConfig, start_daemon},
    utils::{
        logging::{enable_logging, LogTarget},
        runtime::single_thread_runtime,
    },
};
use tracing::error;

fn main() -> ExitCode {
    match run_service(args().collect::<Vec<_>>()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("daybook daemon failed {e:?}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_service(command_args: Vec<String>) -> Result<()> {
    let args = DaemonArgs::parse_from(&command_args);
    let mut config = args.tracker.into_config()?;
    // Daemonizing moves the working directory to /.
    config.database_path = std::path::absolute(&config.database_path)?;

    if !args.force {
        #[cfg(unix)]
        {
            use daemonize::Daemonize;

            let daemonize = Daemonize::new()
                .stdout(daemonize::Stdio::devnull())
                .stderr(daemonize::Stdio::devnull())
                .execute();
            match daemonize {
                daemonize::Outcome::Parent(parent) => {
                    parent
                        .inspect_err(|e| error!("Failed to create daemon on parent side {e:?}"))?;
                    println!("Created daemon");
                    return Ok(());
                }
                daemonize::Outcome::Child(child) => {
                    child?;
                }
            }
        }
    }

    enable_logging(LogTarget::Daemon, args.log, args.log_console)?;
    run(config)
}

fn run(config: TrackerConfig) -> Result<()> {
    single_thread_runtime()?.block_on(start_daemon(config))
}
