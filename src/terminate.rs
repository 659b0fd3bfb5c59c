//! Signal helpers for forcing a stubborn encoder to exit.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// Send `signal` to `pid`, treating an already-gone process as success.
pub(crate) fn signal_pid(pid: i32, signal: i32) -> io::Result<()> {
    if pid <= 0 {
        return Ok(());
    }
    // SAFETY: kill is called with plain integer pid/signal values and no
    // pointers; errno is read immediately after the syscall.
    let ret = unsafe { libc::kill(pid, signal) };
    if ret == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// Probe whether `pid` still exists without delivering a signal.
pub(crate) fn process_exists(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs an existence/permission check only.
    unsafe {
        if libc::kill(pid, 0) == 0 {
            return true;
        }
        matches!(
            io::Error::last_os_error().raw_os_error(),
            Some(code) if code == libc::EPERM
        )
    }
}

/// SIGTERM first, a bounded grace wait, then SIGKILL for anything still alive.
///
/// The caller still owns the process handle and must reap it afterwards.
pub(crate) fn terminate_with_escalation(pid: i32, grace: Duration) {
    if pid <= 0 {
        return;
    }
    if let Err(err) = signal_pid(pid, libc::SIGTERM) {
        tracing::debug!(pid, error = %err, "SIGTERM delivery failed");
    }
    let deadline = Instant::now() + grace;
    while process_exists(pid) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    if process_exists(pid) {
        if let Err(err) = signal_pid(pid, libc::SIGKILL) {
            tracing::debug!(pid, error = %err, "SIGKILL delivery failed");
        }
    }
}
