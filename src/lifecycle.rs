//! Remote stop control.
//!
//! A running daemon listens for `SIGCONT`, a signal that does not terminate
//! a process by default. A second invocation with `--stop` finds the other
//! instances by executable name in the process table and signals them.

use crate::error::ServerError;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Process table scanned for running instances.
pub const PROC_ROOT: &str = "/proc";

/// How long `send_exit_signal` gives the signaled processes to exit.
pub const EXIT_GRACE: Duration = Duration::from_millis(100);

static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Install `handler` to run on every receipt of the exit signal. Only one
/// handler may be registered per process. Must be called inside a runtime.
#[cfg(unix)]
pub fn register_exit_handler<F>(handler: F) -> Result<tokio::task::JoinHandle<()>, ServerError>
where
    F: Fn() + Send + 'static,
{
    use tokio::signal::unix::{signal, SignalKind};

    if REGISTERED.swap(true, Ordering::SeqCst) {
        return Err(ServerError::Lifecycle(
            "exit handler already registered".into(),
        ));
    }
    let mut signals = match signal(SignalKind::from_raw(nix::libc::SIGCONT)) {
        Ok(s) => s,
        Err(e) => {
            REGISTERED.store(false, Ordering::SeqCst);
            return Err(ServerError::Lifecycle(format!(
                "cannot install exit signal handler: {}",
                e
            )));
        }
    };
    Ok(tokio::spawn(async move {
        while signals.recv().await.is_some() {
            info!("Exit signal received");
            handler();
        }
    }))
}

#[cfg(not(unix))]
pub fn register_exit_handler<F>(_handler: F) -> Result<tokio::task::JoinHandle<()>, ServerError>
where
    F: Fn() + Send + 'static,
{
    if REGISTERED.swap(true, Ordering::SeqCst) {
        return Err(ServerError::Lifecycle(
            "exit handler already registered".into(),
        ));
    }
    Ok(tokio::spawn(std::future::pending::<()>()))
}

/// PIDs under `proc_root` whose executable's base name is `exe_name`,
/// leaving out `exclude_pid`. Entries that cannot be read are skipped.
pub fn find_instances(proc_root: &Path, exe_name: &OsStr, exclude_pid: u32) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir(proc_root) else {
        return Vec::new();
    };
    let mut pids: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| {
            let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
            if pid == exclude_pid {
                return None;
            }
            let exe = std::fs::read_link(entry.path().join("exe")).ok()?;
            (exe.file_name()? == exe_name).then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids
}

/// Signal every other running instance of this program to stop. Returns
/// whether at least one of them left the process table within
/// [`EXIT_GRACE`].
#[cfg(unix)]
pub async fn send_exit_signal() -> Result<bool, ServerError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let exe = std::env::current_exe()?;
    let name = exe
        .file_name()
        .ok_or_else(|| ServerError::Lifecycle("cannot name own executable".into()))?;
    let proc_root = Path::new(PROC_ROOT);
    let pids = find_instances(proc_root, name, std::process::id());
    if pids.is_empty() {
        debug!(exe = ?name, "No running instance found");
        return Ok(false);
    }

    for pid in &pids {
        match kill(Pid::from_raw(*pid as i32), Signal::SIGCONT) {
            Ok(()) => debug!(pid, "Exit signal sent"),
            Err(e) => debug!(pid, error = %e, "Cannot signal process"),
        }
    }
    tokio::time::sleep(EXIT_GRACE).await;
    Ok(pids
        .iter()
        .any(|pid| !proc_root.join(pid.to_string()).exists()))
}

#[cfg(not(unix))]
pub async fn send_exit_signal() -> Result<bool, ServerError> {
    Err(ServerError::Lifecycle(
        "remote stop needs a unix process table".into(),
    ))
}
