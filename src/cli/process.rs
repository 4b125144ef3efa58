use std::{
    env,
    path::Path,
    process::Stdio,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use crate::daemon::{
    args::TrackerArgs,
    instance::{
        is_running, pid_file_for, stop_process, InstanceStatus, StopError, StopOutcome,
        DEFAULT_STOP_TIMEOUT,
    },
    storage::event_store::EventStore,
};

use super::daemon_path::to_daemon_path;

const START_WAIT: Duration = Duration::from_secs(3);

/// Spawns the daemon binary, which detaches itself. Fails if a daemon already owns the store.
pub fn start_daemon_process(tracker: TrackerArgs) -> Result<()> {
    let config = tracker.clone().into_config()?;
    let pid_file = config.pid_file();
    let status = is_running(&pid_file)?;
    if status.running {
        error!("daybook daemon is already running (pid {:?})", status.pid);
        bail!("daybook daemon is already running");
    }

    let daemon = to_daemon_path(env::current_exe().context("Can't operate without an executable")?);
    let mut command = std::process::Command::new(&daemon);
    command.args(tracker.to_command_args());
    if tracker.db.is_none() {
        command.arg(format!("--db={}", config.database_path.display()));
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    info!("Spawning {daemon:?}");
    // The daemon forks and the launcher exits right away, so this doesn't leave a zombie.
    let mut launcher = command.spawn()?;
    launcher.wait()?;

    let deadline = Instant::now() + START_WAIT;
    while Instant::now() < deadline {
        if let Some(pid) = is_running(&pid_file)?.pid {
            println!("daybook daemon started (pid {pid})");
            return Ok(());
        }
        thread::sleep(Duration::from_millis(100));
    }
    bail!("daybook daemon didn't come up, see the daemon logs")
}

/// Pid to signal for `status`. `None` means there is nothing to stop.
fn stop_target(status: InstanceStatus) -> Result<Option<u32>> {
    match (status.running, status.pid) {
        (false, _) => Ok(None),
        (true, Some(pid)) => Ok(Some(pid)),
        (true, None) => bail!("daybook daemon is still starting, try again in a moment"),
    }
}

pub fn stop_daemon(database_path: &Path) -> Result<()> {
    let status = is_running(&pid_file_for(database_path))?;
    let Some(pid) = stop_target(status).inspect_err(|e| error!("{e}"))? else {
        println!("daybook daemon is not running");
        return Ok(());
    };

    println!("Stopping daybook daemon (pid {pid})...");
    match stop_process(pid, DEFAULT_STOP_TIMEOUT) {
        Ok(StopOutcome::Stopped) => println!("daybook daemon stopped"),
        Ok(StopOutcome::Killed) => println!("daybook daemon killed"),
        Ok(StopOutcome::NotRunning) => println!("daybook daemon was already stopped"),
        Err(e @ StopError::PermissionDenied { .. }) => {
            error!("{e}");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    }
    // A killed daemon can't clean up after itself.
    is_running(&pid_file_for(database_path))?;
    Ok(())
}

pub fn print_status(database_path: &Path) -> Result<()> {
    let status = is_running(&pid_file_for(database_path))?;
    match (status.running, status.pid) {
        (true, Some(pid)) => println!("daybook daemon is running (pid {pid})"),
        (true, None) => println!("daybook daemon is starting"),
        (false, _) => println!("daybook daemon is not running"),
    }
    println!("Store: {}", database_path.display());

    if database_path.exists() {
        match EventStore::open(database_path.to_path_buf()).and_then(|s| s.last_window_event()) {
            Ok(Some(event)) => println!(
                "Last focus: {} at {}",
                event.app_name,
                event.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            ),
            Ok(None) => println!("Nothing recorded yet"),
            Err(e) => println!("Store is busy: {e}"),
        }
    }
    Ok(())
}
