//! Stream raw binary data into an externally launched encoder process.
//!
//! The session owns one child process and the two byte channels wired to its
//! stdio: writes block the caller under a bounded timeout while diagnostic
//! output is drained opportunistically, so the child never stalls on a full
//! output buffer mid-transfer. Framing of the byte stream and interpretation
//! of the diagnostics are left to the caller.

mod error;
pub mod pipe_session;
mod terminate;

pub use error::{Result, SessionError};
pub use pipe_session::{
    console_sink, null_sink, EncoderSession, OutputSink, DEFAULT_WRITE_TIMEOUT,
};
