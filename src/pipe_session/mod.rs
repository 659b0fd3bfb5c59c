//! Encoder session lifecycle: spawn, blocking writes under a timeout, and
//! opportunistic draining of the encoder's diagnostic output.
//!
//! A session owns one child process and the parent-side ends of its two
//! channels. All blocking happens on the calling thread in bounded poll
//! slices; there is no internal thread. Output is drained only inside
//! `write` iterations and once during `close`, so a child that produces
//! diagnostics faster than the output channel's capacity between two writes
//! can still stall. That is an accepted trade-off of the single-threaded
//! design.

mod channel;
mod io;
mod spawn;

use std::io::Write as _;
use std::os::unix::io::{AsFd, OwnedFd};
use std::path::Path;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, SessionError};
use crate::terminate;

/// Callback receiving chunks of the encoder's diagnostic output.
pub type OutputSink = Box<dyn FnMut(&[u8]) + Send>;

/// Default bound for a single blocking `write` stall.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer capacity requested for each channel; the kernel may clamp it.
const CHANNEL_CAPACITY: usize = 16 * 1024 * 1024;

/// Poll slice used while waiting for writability or child exit.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Grace period between SIGTERM and SIGKILL when close forces termination.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// The default sink: copy diagnostic bytes to the parent's stdout.
pub fn console_sink() -> OutputSink {
    Box::new(|chunk| {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(chunk);
        let _ = stdout.flush();
    })
}

/// A sink that discards everything; use it to disable diagnostics.
pub fn null_sink() -> OutputSink {
    Box::new(|_| {})
}

/// One running encoder child and the channels feeding it.
///
/// Operations are not safe to interleave from multiple threads; `&mut self`
/// enforces the single-caller contract.
pub struct EncoderSession {
    child: Option<Child>,
    /// Non-blocking write end of the child's stdin channel. `None` once the
    /// end-of-input signal has been sent; never becomes `Some` again.
    input: Option<OwnedFd>,
    /// Non-blocking read end of the child's stdout/stderr channel.
    output: Option<OwnedFd>,
    sink: OutputSink,
    timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for EncoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("child", &self.child)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("sink", &"<sink>")
            .field("timeout", &self.timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl EncoderSession {
    /// Spawn `program` with `arg_line` and wire up both channels, using the
    /// default write timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if either channel pair or the child process cannot
    /// be created; everything acquired up to that point is released.
    pub fn create(program: impl AsRef<Path>, arg_line: &str) -> Result<Self> {
        Self::create_with_timeout(program, arg_line, DEFAULT_WRITE_TIMEOUT)
    }

    /// Spawn `program` with `arg_line` and an explicit per-write timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if either channel pair or the child process cannot
    /// be created; everything acquired up to that point is released.
    pub fn create_with_timeout(
        program: impl AsRef<Path>,
        arg_line: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let program = program.as_ref();

        // Every early return below drops the fds acquired so far, so a
        // failing step cannot leak a partially built session.
        let stdin_pair = channel::create_pair("stdin", CHANNEL_CAPACITY, timeout)?;
        let stdout_pair = channel::create_pair("stdout", CHANNEL_CAPACITY, timeout)?;
        channel::set_blocking(&stdin_pair.read).map_err(|source| SessionError::Channel {
            label: "stdin",
            source,
        })?;
        channel::set_blocking(&stdout_pair.write).map_err(|source| SessionError::Channel {
            label: "stdout",
            source,
        })?;
        tracing::debug!(
            input_capacity = stdin_pair.capacity,
            output_capacity = stdout_pair.capacity,
            "channels ready"
        );

        let channel::ChannelPair {
            read: stdin_rd,
            write: stdin_wr,
            timeout,
            ..
        } = stdin_pair;
        let channel::ChannelPair {
            read: stdout_rd,
            write: stdout_wr,
            ..
        } = stdout_pair;

        let child = spawn::launch(program, arg_line, stdin_rd, stdout_wr)?;
        tracing::debug!(pid = child.id(), program = %program.display(), "session running");

        Ok(Self {
            child: Some(child),
            input: Some(stdin_wr),
            output: Some(stdout_rd),
            sink: console_sink(),
            timeout,
            closed: false,
        })
    }

    /// Replace the diagnostic sink; effective for all subsequent drains.
    pub fn set_output_sink(&mut self, sink: OutputSink) {
        self.sink = sink;
    }

    /// Deliver all of `data`, in order, to the encoder's input stream.
    ///
    /// Blocks the caller until every byte is accepted, failing if a stall
    /// outlives the session timeout, the encoder exits first, or the OS
    /// rejects the write. After a failure the number of bytes actually
    /// delivered is unspecified and the session should be closed.
    ///
    /// # Errors
    ///
    /// `WriteTimeout`, `ChildExited`, `Write`, or `Closed`.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut sent = 0;
        while sent < data.len() {
            let attempt = {
                let input = self.input.as_ref().ok_or(SessionError::Closed)?;
                io::try_write(input.as_fd(), &data[sent..])
            };
            match attempt {
                Ok(n) => {
                    sent += n;
                    // Keeps the child from stalling on a full output buffer
                    // while the parent is still supplying input.
                    self.drain_output();
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait_write_ready()?;
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(SessionError::Write(err)),
            }
        }
        Ok(())
    }

    /// Signal end-of-input and wait for the encoder to finish.
    ///
    /// Drops the input channel's write end (the end-of-stream the child
    /// observes) and waits up to `timeout` (`None` = forever) for the child
    /// to exit. If it has not exited and `terminate_on_timeout` is set, the
    /// child is escalated from SIGTERM to SIGKILL. A final drain pass runs
    /// in all cases so trailing diagnostics are not lost. Returns the exit
    /// status when one was observed; timing out here is not an error.
    /// Calling `close` again is a no-op.
    pub fn close(
        &mut self,
        timeout: Option<Duration>,
        terminate_on_timeout: bool,
    ) -> Option<ExitStatus> {
        if self.closed {
            return None;
        }
        self.input = None;

        let mut status = self.wait_child_exit(timeout);
        if status.is_none() && terminate_on_timeout {
            if let Some(pid) = self.child_pid() {
                tracing::warn!(pid, "encoder ignored end-of-input; forcing termination");
                terminate::terminate_with_escalation(pid, TERMINATE_GRACE);
            }
            status = self.reap_child();
        }

        self.drain_output();
        self.output = None;
        if status.is_some() {
            self.child = None;
        }
        self.closed = true;
        status
    }

    /// Block until the input channel accepts more bytes, the child dies, or
    /// the session timeout lapses.
    fn wait_write_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let ready = {
                let input = self.input.as_ref().ok_or(SessionError::Closed)?;
                let remaining = deadline.saturating_duration_since(Instant::now());
                io::wait_writable(input.as_fd(), remaining.min(WAIT_SLICE))
                    .map_err(SessionError::Write)?
            };
            if ready {
                return Ok(());
            }
            if let Some(status) = self.try_wait_child() {
                return Err(SessionError::ChildExited(Some(status)));
            }
            if Instant::now() >= deadline {
                return Err(SessionError::WriteTimeout(self.timeout));
            }
        }
    }

    /// Forward currently buffered child output to the sink without blocking.
    ///
    /// Measures the pending byte count first, then consumes exactly that
    /// amount in small chunks. Best-effort: a failed read truncates the pass
    /// silently. Returns the count consumed.
    fn drain_output(&mut self) -> usize {
        let Some(output) = self.output.as_ref() else {
            return 0;
        };
        let available = match io::available_bytes(output.as_fd()) {
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(error = %err, "drain: byte count probe failed");
                return 0;
            }
        };

        let mut scratch = [0u8; io::DRAIN_CHUNK];
        let mut consumed = 0;
        while consumed < available {
            let want = scratch.len().min(available - consumed);
            match io::read_chunk(output.as_fd(), &mut scratch[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    consumed += n;
                    (self.sink)(&scratch[..n]);
                }
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        tracing::debug!(error = %err, "drain: read failed mid-pass");
                    }
                    break;
                }
            }
        }
        consumed
    }

    /// Non-blocking child exit probe; the status is cached by the handle.
    fn try_wait_child(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(status) => status,
            Err(err) => {
                tracing::debug!(error = %err, "child status probe failed");
                None
            }
        }
    }

    /// Wait for child exit in bounded slices, returning as soon as the exit
    /// is observed; `None` timeout waits forever.
    fn wait_child_exit(&mut self, timeout: Option<Duration>) -> Option<ExitStatus> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(status) = self.try_wait_child() {
                return Some(status);
            }
            self.child.as_ref()?;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return None;
                }
            }
            thread::sleep(WAIT_SLICE);
        }
    }

    fn reap_child(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.wait() {
            Ok(status) => Some(status),
            Err(err) => {
                tracing::debug!(error = %err, "reap after termination failed");
                None
            }
        }
    }

    fn child_pid(&self) -> Option<i32> {
        self.child
            .as_ref()
            .and_then(|child| i32::try_from(child.id()).ok())
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        self.input = None;
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(_)) | Err(_) => {}
                Ok(None) => {
                    if let Ok(pid) = i32::try_from(child.id()) {
                        terminate::terminate_with_escalation(pid, TERMINATE_GRACE);
                    }
                    let _ = child.wait();
                }
            }
        }
    }
}
