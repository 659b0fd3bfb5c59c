//! Demo front end: stream a synthetic RGB clip into ffmpeg (or any
//! compatible encoder) through an encoder session.
//!
//! The session core imposes no structure on the byte stream; this binary
//! supplies the raw-video framing contract by assembling the input preamble
//! and feeding fixed-size frames.

mod frames;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use encpipe::{null_sink, EncoderSession};

/// Stream a generated test clip into an external encoder.
#[derive(Debug, Parser)]
#[command(
    about = "Stream a generated raw-video clip into an external encoder",
    version
)]
struct DemoConfig {
    /// Path of the encoder executable (ffmpeg or compatible)
    encoder: PathBuf,

    /// Output arguments appended verbatim after the raw-video input
    /// preamble; must include the output target (e.g. "-y out.mp4")
    #[arg(allow_hyphen_values = true)]
    output_args: String,

    /// Frame width in pixels
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Frames per second fed to the encoder
    #[arg(long, default_value_t = 60)]
    framerate: u32,

    /// Clip length in seconds
    #[arg(long, default_value_t = 5)]
    seconds: u32,

    /// Per-write stall timeout in milliseconds
    #[arg(long = "timeout-ms", env = "ENCPIPE_TIMEOUT_MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print the assembled encoder invocation and exit
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Discard the encoder's diagnostic output instead of printing it
    #[arg(long, default_value_t = false)]
    quiet: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Fixed raw-video input preamble with the caller's output args appended.
fn assemble_arg_line(config: &DemoConfig) -> String {
    format!(
        "-c:v rawvideo -f rawvideo -pix_fmt rgb24 -s:v {}x{} -framerate {} -i - {}",
        config.width, config.height, config.framerate, config.output_args
    )
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "encpipe=warn",
        1 => "encpipe=debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    // Diagnostics from the encoder go to stdout, so logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let config = DemoConfig::parse();
    init_logging(config.verbose);

    let arg_line = assemble_arg_line(&config);
    if config.dry_run {
        println!("{} {}", config.encoder.display(), arg_line);
        return Ok(());
    }

    let mut session = EncoderSession::create_with_timeout(
        &config.encoder,
        &arg_line,
        Duration::from_millis(config.timeout_ms),
    )
    .with_context(|| format!("failed to start encoder {}", config.encoder.display()))?;
    if config.quiet {
        session.set_output_sink(null_sink());
    }

    let total_frames = config.framerate.saturating_mul(config.seconds);
    let mut frame = vec![0u8; frames::frame_len(config.width, config.height)];
    for index in 0..total_frames {
        frames::fill_gradient(&mut frame, config.width, config.height, index, config.framerate);
        session
            .write(&frame)
            .with_context(|| format!("failed to deliver frame {index}"))?;
    }

    match session.close(Some(Duration::from_secs(30)), true) {
        Some(status) if status.success() => Ok(()),
        Some(status) => bail!("encoder exited with {status}"),
        None => bail!("encoder did not exit and had to be abandoned"),
    }
}
