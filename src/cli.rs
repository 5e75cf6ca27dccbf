use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "audiofft", about = "Realtime loopback FFT for animation drivers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List audio input devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture, analyze and print live bin values
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Input device index (see `audiofft devices`); auto-selected when omitted
    #[arg(short, long)]
    pub device: Option<usize>,

    /// Analyze a synthetic sine tone at this frequency instead of a real device
    #[arg(long)]
    pub tone: Option<f32>,

    /// Amplitude of the synthetic tone (0.0-1.0)
    #[arg(long, default_value_t = 0.5)]
    pub amplitude: f32,

    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(long, value_parser = parse_seconds)]
    pub duration: Option<Duration>,

    /// Capture sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Frames per capture block
    #[arg(long)]
    pub block_size: Option<usize>,

    /// FFT window size in samples
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Number of log-spaced bins
    #[arg(long)]
    pub bins: Option<usize>,

    /// Tick interval in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print final values as JSON
    #[arg(long)]
    pub json: bool,
}

/// Seconds as a float; rejects negative, NaN, infinite and out-of-range values.
fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let secs: f32 = arg.parse().map_err(|e| format!("{}", e))?;
    Duration::try_from_secs_f32(secs).map_err(|e| format!("invalid duration {}: {}", arg, e))
}
