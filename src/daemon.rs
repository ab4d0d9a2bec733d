//! Detaching and privilege changes. Both run before the async runtime
//! exists, since forking a process with live worker threads is unsound.

use crate::error::ServerError;
use tracing::debug;

/// Detach from the controlling terminal. The working directory is kept;
/// stdio stays open in debug mode so diagnostics remain visible.
#[cfg(unix)]
pub fn daemonize(debug: bool) -> Result<(), ServerError> {
    nix::unistd::daemon(true, debug)
        .map_err(|e| ServerError::Lifecycle(format!("cannot detach: {}", e)))
}

#[cfg(not(unix))]
pub fn daemonize(_debug: bool) -> Result<(), ServerError> {
    debug!("Detaching is not supported on this platform, staying in foreground");
    Ok(())
}

/// Best-effort switch to uid 0. Returns whether it took effect.
#[cfg(unix)]
pub fn try_setuid_root() -> bool {
    use nix::unistd::{setuid, Uid};
    match setuid(Uid::from_raw(0)) {
        Ok(()) => {
            debug!("Running as uid 0");
            true
        }
        Err(e) => {
            debug!(error = %e, "setuid(0) failed");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn try_setuid_root() -> bool {
    false
}
