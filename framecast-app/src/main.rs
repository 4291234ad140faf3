//! Framecast command line entry point.
//!
//! ```text
//! framecast devices                 list output devices
//! framecast inspect <file.wav>      show layout and resolved frame timing
//! framecast play --file <file.wav>  publish the file and play it back
//! framecast play --tone 440         publish a test tone and play it back
//! ```
//!
//! Settings come from a JSON file in the app data directory; command line
//! flags override them for one run (or persist them with `--save`).

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use settings::{default_settings_path, load_settings};
use tracing::info;

/// Command-line arguments for framecast
#[derive(Parser, Debug)]
#[command(name = "framecast")]
#[command(about = "Stream multichannel audio frames to an output device")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the platform app data directory)
    #[arg(long, global = true, env = "FRAMECAST_SETTINGS", value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List output devices with their channel counts and default rates
    Devices,
    /// Show a WAV file's layout and the frame timing it would be published with
    Inspect {
        file: PathBuf,
        #[command(flatten)]
        framing: FramingArgs,
    },
    /// Publish a file or tone and play it through the output device
    Play(PlayArgs),
}

/// Frame timing overrides shared by `inspect` and `play`.
#[derive(Args, Debug, Default, Clone)]
pub struct FramingArgs {
    /// Frames per second (wins over --frame-size)
    #[arg(long)]
    pub frame_rate: Option<u32>,

    /// Samples per channel per frame
    #[arg(long)]
    pub frame_size: Option<usize>,

    /// Publish at most this many source channels
    #[arg(long)]
    pub max_channels: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct PlayArgs {
    /// WAV file to publish
    #[arg(long, value_name = "FILE", conflicts_with = "tone")]
    pub file: Option<PathBuf>,

    /// Publish a sine tone at this frequency (Hz) instead of a file
    #[arg(long, value_name = "HZ")]
    pub tone: Option<f32>,

    /// Tone length in seconds
    #[arg(long, default_value = "3.0")]
    pub seconds: f32,

    /// Tone channel count
    #[arg(long, default_value = "2")]
    pub tone_channels: usize,

    /// Output device: index, name substring, or "default"
    #[arg(short, long, env = "FRAMECAST_DEVICE")]
    pub device: Option<String>,

    /// Ring capacity per channel, in frames
    #[arg(long)]
    pub ring_frames: Option<usize>,

    /// Open the device at this sample rate instead of its default
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Open the device with this many channels instead of its default
    #[arg(long)]
    pub channels: Option<u16>,

    #[command(flatten)]
    pub framing: FramingArgs,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    pub save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);

    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&settings.log_filter))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("framecast=info")),
        )
        .init();

    info!(settings = %settings_path.display(), "framecast starting");

    match cli.command {
        Command::Devices => commands::devices(),
        Command::Inspect { file, framing } => commands::inspect(&file, &settings, &framing),
        Command::Play(args) => commands::play(args, settings, &settings_path).await,
    }
}
