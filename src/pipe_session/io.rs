//! Non-blocking pipe primitives for the session's write loop and drain passes.

use std::io::{self, ErrorKind};
use std::os::unix::io::{AsRawFd, BorrowedFd};
use std::time::Duration;

/// Scratch size for one drain chunk.
pub(super) const DRAIN_CHUNK: usize = 256;

/// Attempt a single non-blocking write; short writes are the caller's loop.
pub(super) fn try_write(fd: BorrowedFd<'_>, data: &[u8]) -> io::Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    // SAFETY: fd is a live pipe descriptor and data is a live slice.
    let written = unsafe {
        libc::write(
            fd.as_raw_fd(),
            data.as_ptr() as *const libc::c_void,
            data.len(),
        )
    };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    if written == 0 {
        return Err(io::Error::new(ErrorKind::WriteZero, "pipe write returned 0"));
    }
    Ok(written as usize)
}

/// Wait one bounded slice for `fd` to accept more bytes.
///
/// Returns `Ok(true)` when the descriptor reports any readiness (including
/// an error condition, which the next write surfaces as errno) and
/// `Ok(false)` when the slice elapsed quietly.
pub(super) fn wait_writable(fd: BorrowedFd<'_>, slice: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLOUT,
        revents: 0,
    };
    let timeout_ms = slice.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: poll reads and writes one pollfd owned by this frame.
    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0 && pollfd.revents != 0)
}

/// Bytes currently buffered in the pipe, measured without consuming them.
pub(super) fn available_bytes(fd: BorrowedFd<'_>) -> io::Result<usize> {
    let mut available: libc::c_int = 0;
    // SAFETY: FIONREAD writes the pending byte count into `available`.
    if unsafe { libc::ioctl(fd.as_raw_fd(), libc::FIONREAD, &mut available) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(available.max(0) as usize)
}

/// Read at most `buf.len()` buffered bytes; never blocks on a non-blocking fd.
pub(super) fn read_chunk(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: buf is writable for buf.len() bytes and fd is a live descriptor.
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe_session::channel::create_pair;
    use std::os::unix::io::AsFd;

    const TEST_TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn empty_write_is_a_no_op() {
        let pair = create_pair("io-empty", 65_536, TEST_TIMEOUT).expect("create pair");
        assert_eq!(try_write(pair.write.as_fd(), &[]).expect("empty write"), 0);
        assert_eq!(available_bytes(pair.read.as_fd()).expect("measure"), 0);
    }

    #[test]
    fn available_bytes_tracks_buffered_data() {
        let pair = create_pair("io-count", 65_536, TEST_TIMEOUT).expect("create pair");
        try_write(pair.write.as_fd(), b"hello").expect("write");
        assert_eq!(available_bytes(pair.read.as_fd()).expect("measure"), 5);

        let mut buf = [0u8; 2];
        read_chunk(pair.read.as_fd(), &mut buf).expect("partial read");
        assert_eq!(available_bytes(pair.read.as_fd()).expect("measure"), 3);
    }

    #[test]
    fn read_chunk_on_empty_pipe_would_block() {
        let pair = create_pair("io-block", 65_536, TEST_TIMEOUT).expect("create pair");
        let mut buf = [0u8; 4];
        let err = read_chunk(pair.read.as_fd(), &mut buf).expect_err("nothing buffered");
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn wait_writable_is_immediate_on_an_empty_pipe() {
        let pair = create_pair("io-ready", 65_536, TEST_TIMEOUT).expect("create pair");
        let ready = wait_writable(pair.write.as_fd(), Duration::from_millis(50)).expect("poll");
        assert!(ready);
    }

    #[test]
    fn wait_writable_times_out_on_a_full_pipe() {
        let pair = create_pair("io-full", 4096, TEST_TIMEOUT).expect("create pair");
        let filler = [0u8; 4096];
        loop {
            match try_write(pair.write.as_fd(), &filler) {
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => panic!("unexpected fill error: {err}"),
            }
        }
        let ready = wait_writable(pair.write.as_fd(), Duration::from_millis(20)).expect("poll");
        assert!(!ready, "a full pipe must not report writability");
    }
}
