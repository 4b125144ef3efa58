//! Makes sure only one daemon writes to a store. The daemon keeps an advisory lock on a pid file
//! next to the store for its whole lifetime; other processes read the pid out of it to check on
//! or stop the daemon.

use std::{
    fs::{self, File},
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PID_FILE_NAME: &str = "daybook.pid";

/// How long [stop_process] waits for a graceful exit before killing.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

const ACQUIRE_ATTEMPTS: u32 = 3;

/// Pid file used for the store at `database_path`.
pub fn pid_file_for(database_path: &Path) -> PathBuf {
    database_path
        .parent()
        .map(|dir| dir.join(PID_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(PID_FILE_NAME))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStatus {
    pub running: bool,
    pub pid: Option<u32>,
}

impl InstanceStatus {
    const NOT_RUNNING: InstanceStatus = InstanceStatus {
        running: false,
        pid: None,
    };
}

/// Exclusive ownership of a store. Dropping the guard releases it.
#[derive(Debug)]
pub struct SingleInstanceGuard {
    path: PathBuf,
    file: Option<File>,
}

impl SingleInstanceGuard {
    /// Tries to become the owner without blocking. `Ok(None)` means another process owns the
    /// pid file; its content is left untouched.
    pub fn acquire(path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..ACQUIRE_ATTEMPTS {
            // Not truncated on open. Only the process holding the lock may change the content.
            let file = File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            if !try_lock(&file)? {
                debug!("Pid file {path:?} is locked by another process");
                return Ok(None);
            }
            if still_linked(&file, path)? {
                return Self::claim(path, file).map(Some);
            }
            // Stale healing unlinked the file between our open and lock.
            debug!("Pid file {path:?} was replaced while locking, retrying");
            FileExt::unlock(&file)?;
        }
        warn!("Pid file {path:?} keeps getting replaced, giving up");
        Ok(None)
    }

    fn claim(path: &Path, mut file: File) -> io::Result<Self> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;

        info!("Acquired {path:?} for pid {}", std::process::id());
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlocks and removes the pid file.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        // Removed while still locked so nobody can take over a file that is about to vanish.
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove pid file {:?}: {e}", self.path);
            }
        }
        if let Err(e) = FileExt::unlock(&file) {
            warn!("Failed to unlock pid file {:?}: {e}", self.path);
        }
        debug!("Released {:?}", self.path);
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn try_lock(file: &File) -> io::Result<bool> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(e)
            if e.kind() == ErrorKind::WouldBlock
                || e.raw_os_error() == fs4::lock_contended_error().raw_os_error() =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Whether `path` still names the file we have open.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let opened = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == opened.dev() && current.ino() == opened.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}

enum LockProbe {
    Missing,
    /// Some process owns the file.
    Held,
    /// Nobody owned the file; the returned handle now holds the lock.
    Free(File),
}

fn probe_lock(path: &Path) -> io::Result<LockProbe> {
    let file = match File::options().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LockProbe::Missing),
        Err(e) => return Err(e),
    };
    if try_lock(&file)? {
        Ok(LockProbe::Free(file))
    } else {
        Ok(LockProbe::Held)
    }
}

fn read_pid(path: &Path) -> io::Result<Option<u32>> {
    let mut content = String::new();
    match File::open(path) {
        Ok(mut file) => file.read_to_string(&mut content)?,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(content.trim().parse().ok())
}

/// Checks whether a daemon owns the pid file. Only the lock decides ownership: an unlocked file
/// is stale and removed even when its pid belongs to a live process, since pids get reused.
pub fn is_running(path: &Path) -> io::Result<InstanceStatus> {
    let file = match probe_lock(path)? {
        LockProbe::Missing => return Ok(InstanceStatus::NOT_RUNNING),
        LockProbe::Held => {
            // The owner may not have written its pid yet.
            let pid = read_pid(path)?.filter(|pid| process::is_alive(*pid));
            return Ok(InstanceStatus { running: true, pid });
        }
        LockProbe::Free(file) => file,
    };

    info!("Removing stale pid file {path:?}");
    // Removed while still locked. A starter that opened the old file meanwhile notices the unlink
    // in acquire and starts over.
    let removed = match fs::remove_file(path) {
        Ok(()) => Ok(InstanceStatus::NOT_RUNNING),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(InstanceStatus::NOT_RUNNING),
        Err(e) => Err(e),
    };
    if let Err(e) = FileExt::unlock(&file) {
        warn!("Failed to unlock stale pid file {path:?}: {e}");
    }
    removed
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("not permitted to signal process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after the terminate signal.
    Stopped,
    /// Didn't exit in time and was killed.
    Killed,
    /// Was already gone when we tried to signal it.
    NotRunning,
}

/// Asks `pid` to terminate, waits up to `timeout` for it to exit and kills it otherwise.
pub fn stop_process(pid: u32, timeout: Duration) -> Result<StopOutcome, StopError> {
    match process::terminate(pid)? {
        process::Delivery::Delivered => {}
        process::Delivery::NoProcess => return Ok(StopOutcome::NotRunning),
    }

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        thread::sleep(STOP_POLL_INTERVAL);
        if !process::is_alive(pid) {
            return Ok(StopOutcome::Stopped);
        }
    }

    warn!("Process {pid} ignored terminate for {timeout:?}, killing it");
    match process::kill(pid)? {
        process::Delivery::Delivered => Ok(StopOutcome::Killed),
        process::Delivery::NoProcess => Ok(StopOutcome::Stopped),
    }
}

#[cfg(unix)]
mod process {
    use nix::{
        errno::Errno,
        sys::signal::{self, Signal},
        unistd::Pid,
    };

    use super::StopError;

    pub enum Delivery {
        Delivered,
        NoProcess,
    }

    fn to_pid(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    /// Zero signal probe. A process we may not signal still exists.
    pub fn is_alive(pid: u32) -> bool {
        let Some(pid) = to_pid(pid) else {
            return false;
        };
        match signal::kill(pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn send(pid: u32, sig: Signal) -> Result<Delivery, StopError> {
        let Some(target) = to_pid(pid) else {
            return Ok(Delivery::NoProcess);
        };
        match signal::kill(target, sig) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(Errno::ESRCH) => Ok(Delivery::NoProcess),
            Err(Errno::EPERM) => Err(StopError::PermissionDenied { pid }),
            Err(e) => Err(StopError::Signal {
                pid,
                message: e.to_string(),
            }),
        }
    }

    pub fn terminate(pid: u32) -> Result<Delivery, StopError> {
        send(pid, Signal::SIGTERM)
    }

    pub fn kill(pid: u32) -> Result<Delivery, StopError> {
        send(pid, Signal::SIGKILL)
    }
}

#[cfg(not(unix))]
mod process {
    use super::StopError;

    pub enum Delivery {
        Delivered,
        NoProcess,
    }

    pub fn is_alive(pid: u32) -> bool {
        pid == std::process::id()
    }

    pub fn terminate(pid: u32) -> Result<Delivery, StopError> {
        Err(StopError::Signal {
            pid,
            message: "signals are only supported on unix".into(),
        })
    }

    pub fn kill(pid: u32) -> Result<Delivery, StopError> {
        terminate(pid)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{
        is_running, pid_file_for, stop_process, InstanceStatus, SingleInstanceGuard, StopOutcome,
    };

    #[cfg(unix)]
    use super::still_linked;

    #[test]
    fn pid_file_sits_next_to_store() {
        let path = pid_file_for(std::path::Path::new("/data/daybook/daybook.duckdb"));
        assert_eq!(path, std::path::Path::new("/data/daybook/daybook.pid"));
    }

    #[test]
    fn acquire_writes_pid_and_release_removes_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daybook.pid");

        let guard = SingleInstanceGuard::acquire(&path)?.expect("lock should be free");
        assert_eq!(fs::read_to_string(&path)?, std::process::id().to_string());
        assert_eq!(
            is_running(&path)?,
            InstanceStatus {
                running: true,
                pid: Some(std::process::id())
            }
        );

        guard.release();
        assert!(!path.exists());
        assert_eq!(is_running(&path)?, InstanceStatus::NOT_RUNNING);
        Ok(())
    }

    #[test]
    fn drop_releases_lock() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daybook.pid");
        {
            let _guard = SingleInstanceGuard::acquire(&path)?.expect("lock should be free");
        }
        assert!(!path.exists());
        assert!(SingleInstanceGuard::acquire(&path)?.is_some());
        Ok(())
    }

    #[test]
    fn concurrent_acquire_has_single_winner() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daybook.pid");
        let barrier = Arc::new(Barrier::new(2));

        let contenders = (0..2)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    SingleInstanceGuard::acquire(&path).map_err(anyhow::Error::from)
                })
            })
            .collect::<Vec<_>>();

        let results = contenders
            .into_iter()
            .map(|t| t.join().expect("contender panicked"))
            .collect::<Result<Vec<_>>>()?;
        let winners = results.iter().filter(|r| r.is_some()).count();
        assert_eq!(winners, 1);

        // The loser left the winner's pid in place.
        assert_eq!(fs::read_to_string(&path)?, std::process::id().to_string());
        assert!(SingleInstanceGuard::acquire(&path)?.is_none());
        assert_eq!(fs::read_to_string(&path)?, std::process::id().to_string());
        Ok(())
    }

    #[test]
    fn stale_pid_file_is_removed() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daybook.pid");
        // Far above any real pid limit.
        fs::write(&path, "2147483000")?;
        assert_eq!(is_running(&path)?, InstanceStatus::NOT_RUNNING);
        assert!(!path.exists());

        fs::write(&path, "garbage")?;
        assert_eq!(is_running(&path)?, InstanceStatus::NOT_RUNNING);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn unlocked_file_with_live_pid_is_stale() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daybook.pid");

        // Pid 1 and our own pid are alive, but neither holds the lock.
        for pid in [1, std::process::id()] {
            fs::write(&path, pid.to_string())?;
            assert_eq!(is_running(&path)?, InstanceStatus::NOT_RUNNING);
            assert!(!path.exists());
        }

        let guard = SingleInstanceGuard::acquire(&path)?;
        assert!(guard.is_some());
        assert_eq!(fs::read_to_string(&path)?, std::process::id().to_string());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn unlinked_pid_file_is_detected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daybook.pid");
        fs::write(&path, "")?;
        let opened = fs::File::open(&path)?;
        assert!(still_linked(&opened, &path)?);

        fs::remove_file(&path)?;
        assert!(!still_linked(&opened, &path)?);

        // A new file under the same name is a different file.
        fs::write(&path, "")?;
        assert!(!still_linked(&opened, &path)?);
        Ok(())
    }

    #[test]
    fn locked_file_without_pid_is_not_stale() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daybook.pid");
        let _guard = SingleInstanceGuard::acquire(&path)?.expect("lock should be free");
        fs::write(&path, "")?;

        assert_eq!(
            is_running(&path)?,
            InstanceStatus {
                running: true,
                pid: None
            }
        );
        assert!(path.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn stop_terminates_child_process() -> Result<()> {
        let mut child = std::process::Command::new("sleep").arg("30").spawn()?;
        let pid = child.id();

        let reaper = thread::spawn(move || child.wait());
        let outcome = stop_process(pid, Duration::from_secs(5))?;
        assert_eq!(outcome, StopOutcome::Stopped);
        reaper.join().expect("reaper panicked")?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn stop_reports_missing_process() -> Result<()> {
        assert_eq!(
            stop_process(2_147_483_000, Duration::from_millis(200))?,
            StopOutcome::NotRunning
        );
        Ok(())
    }
}
