//! FIFO channel pairs with process-unique identities for the encoder's stdio.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::SessionError;

/// Monotonic per-process sequence so concurrent sessions never share a path.
static PAIR_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// One unidirectional byte stream: a read end, a write end, and the
/// capacity/timeout it was built with.
///
/// Both ends start non-blocking and close-on-exec; the end destined for the
/// child gets its flags adjusted before launch.
pub(super) struct ChannelPair {
    pub(super) read: OwnedFd,
    pub(super) write: OwnedFd,
    /// Capacity the kernel actually granted, which may differ from the request.
    pub(super) capacity: usize,
    pub(super) timeout: Duration,
}

fn channel_path(label: &str, pid: u32, seq: u64) -> PathBuf {
    std::env::temp_dir().join(format!("encpipe-{pid}-{seq}-{label}.fifo"))
}

/// Create a connected FIFO pair under a globally unique path.
///
/// The path combines the parent pid, a process-wide sequence number, and the
/// role label, and is unlinked as soon as both ends are open, so a second
/// accidental connector fails outright. On any failure every end created so
/// far is released before returning; partial success is never returned.
pub(super) fn create_pair(
    label: &'static str,
    capacity: usize,
    timeout: Duration,
) -> Result<ChannelPair, SessionError> {
    let path = channel_path(label, std::process::id(), next_sequence());
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| SessionError::Channel {
        label,
        source: io::Error::new(io::ErrorKind::InvalidInput, "channel path contains NUL"),
    })?;

    // SAFETY: c_path is a valid NUL-terminated path owned by this frame.
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } != 0 {
        return Err(SessionError::Channel {
            label,
            source: io::Error::last_os_error(),
        });
    }

    // The read end must open first: a write-only non-blocking open of a FIFO
    // fails with ENXIO until a reader exists.
    let read = match open_end(&c_path, libc::O_RDONLY) {
        Ok(fd) => fd,
        Err(source) => {
            unlink(&c_path);
            return Err(SessionError::Channel { label, source });
        }
    };
    let write = match open_end(&c_path, libc::O_WRONLY) {
        Ok(fd) => fd,
        Err(source) => {
            unlink(&c_path);
            return Err(SessionError::Channel { label, source });
        }
    };

    // Unlinking here is the single-connection guarantee: once both ends are
    // wired the name is gone and nothing else can open it.
    unlink(&c_path);

    let granted = set_capacity(&write, capacity);
    tracing::debug!(label, path = %path.display(), granted, "channel pair ready");
    Ok(ChannelPair {
        read,
        write,
        capacity: granted,
        timeout,
    })
}

fn next_sequence() -> u64 {
    PAIR_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

fn open_end(path: &CString, access: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: path is NUL-terminated; the returned fd is immediately wrapped
    // so it cannot leak past an early return.
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            access | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by open and is exclusively ours.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn unlink(path: &CString) {
    // SAFETY: path is a valid NUL-terminated path; failure is ignorable
    // because the fds stay usable either way.
    unsafe {
        libc::unlink(path.as_ptr());
    }
}

/// Ask the kernel for `want` bytes of pipe buffer; report what was granted.
fn set_capacity(fd: &OwnedFd, want: usize) -> usize {
    let raw = fd.as_raw_fd();
    #[cfg(target_os = "linux")]
    // SAFETY: fcntl only adjusts or queries the buffer of our own descriptor.
    unsafe {
        let request = want.min(libc::c_int::MAX as usize) as libc::c_int;
        if libc::fcntl(raw, libc::F_SETPIPE_SZ, request) < 0 {
            tracing::debug!(want, "pipe capacity request refused; keeping kernel default");
        }
        let got = libc::fcntl(raw, libc::F_GETPIPE_SZ);
        if got > 0 {
            return got as usize;
        }
    }
    let _ = raw;
    want
}

/// Clear `O_NONBLOCK` so a child-destined end behaves as ordinary stdio.
pub(super) fn set_blocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl reads and updates status flags on our own descriptor.
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(raw, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
