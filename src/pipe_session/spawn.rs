//! Launches the encoder process with its stdio wired to session channels.

use std::os::unix::io::OwnedFd;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::error::SessionError;

/// Start `program` with `arg_line` split into words, reading from `stdin_rd`
/// and sending both stdout and stderr into `stdout_wr`.
///
/// Beyond word splitting the argument line is passed through untouched. The
/// call does not wait for the child to reach any readiness state; a spawn
/// failure surfaces immediately with no partial handle.
pub(super) fn launch(
    program: &Path,
    arg_line: &str,
    stdin_rd: OwnedFd,
    stdout_wr: OwnedFd,
) -> Result<Child, SessionError> {
    let args = shell_words::split(arg_line)?;
    let launch_error = |source| SessionError::Launch {
        program: program.display().to_string(),
        source,
    };

    // Diagnostics and normal output share one channel, so the write end is
    // duplicated for the stderr slot.
    let stderr_wr = stdout_wr.try_clone().map_err(launch_error)?;

    tracing::debug!(program = %program.display(), ?args, "launching encoder");
    Command::new(program)
        .args(&args)
        .stdin(Stdio::from(stdin_rd))
        .stdout(Stdio::from(stdout_wr))
        .stderr(Stdio::from(stderr_wr))
        .spawn()
        .map_err(launch_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe_session::channel::{create_pair, set_blocking};
    use std::time::Duration;

    const TEST_TIMEOUT: Duration = Duration::from_secs(1);

    fn test_endpoints() -> (OwnedFd, OwnedFd) {
        let stdin_pair = create_pair("spawn-stdin", 65_536, TEST_TIMEOUT).expect("stdin pair");
        let stdout_pair = create_pair("spawn-stdout", 65_536, TEST_TIMEOUT).expect("stdout pair");
        set_blocking(&stdin_pair.read).expect("blocking stdin");
        set_blocking(&stdout_pair.write).expect("blocking stdout");
        (stdin_pair.read, stdout_pair.write)
    }

    #[test]
    fn missing_program_fails_with_launch_error() {
        let (stdin_rd, stdout_wr) = test_endpoints();
        let err = launch(
            Path::new("/nonexistent/encoder-binary"),
            "",
            stdin_rd,
            stdout_wr,
        )
        .expect_err("spawn must fail");
        match err {
            SessionError::Launch { program, .. } => {
                assert!(program.contains("encoder-binary"));
            }
            other => panic!("expected Launch error, got {other}"),
        }
    }

    #[test]
    fn unbalanced_quotes_fail_before_spawning() {
        let (stdin_rd, stdout_wr) = test_endpoints();
        let err = launch(Path::new("/bin/cat"), "\"broken", stdin_rd, stdout_wr)
            .expect_err("argument split must fail");
        assert!(matches!(err, SessionError::ArgumentLine(_)));
    }

    #[test]
    fn spawned_child_is_reapable() {
        let (stdin_rd, stdout_wr) = test_endpoints();
        let mut child = launch(Path::new("/bin/true"), "", stdin_rd, stdout_wr).expect("spawn true");
        let status = child.wait().expect("reap true");
        assert!(status.success());
    }
}
