//! Command line interface for MediaForge
//!
//! Parses one transformation subcommand, expands file or directory inputs,
//! and drives a batch run while printing progress events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use walkdir::WalkDir;

use mediaforge_config::Config;
use mediaforge_engine::batch::{BatchEvent, BatchOptions, BatchRunner, BatchSummary, JobState};
use mediaforge_engine::ffmpeg::FfmpegInvoker;
use mediaforge_engine::probe::FfprobeProber;
use mediaforge_engine::spec::{
    AspectRatio, AudioContainer, CropPosition, LoopMode, OutputFormat, ScalingMode, SpecError,
    TransformKind, TransformSpec, VideoCodec,
};

/// MediaForge - batch media transformation on top of ffmpeg
#[derive(Parser, Debug)]
#[command(name = "mediaforge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mediaforge.toml")]
    config: PathBuf,

    /// Override the configured output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Override the configured job concurrency (0 = auto)
    #[arg(short, long)]
    jobs: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Change playback speed and/or pitch of audio files
    SpeedPitch {
        /// Audio file or directory of audio files
        input: PathBuf,
        /// Speed adjustment in percent, -50 to +100
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        speed: f64,
        /// Pitch adjustment in semitones, -12 to +12
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        pitch: f64,
        /// Output bitrate (128k, 192k, 256k, 320k)
        #[arg(long, default_value = "192k")]
        bitrate: String,
    },
    /// Re-encode audio files into a different container
    Transcode {
        /// Audio file or directory of audio files
        input: PathBuf,
        /// Target container
        #[arg(long, value_enum)]
        format: ContainerArg,
        /// Output bitrate, ignored for lossless targets
        #[arg(long, default_value = "192k")]
        bitrate: String,
    },
    /// Convert images or videos to a new aspect ratio
    Aspect {
        /// Image/video file or directory
        input: PathBuf,
        /// Target ratio, e.g. 16:9 or 1:1
        #[arg(long)]
        ratio: String,
        /// Where to anchor the crop window
        #[arg(long, value_enum, default_value_t = PositionArg::Center)]
        position: PositionArg,
        /// Output format
        #[arg(long, value_enum, default_value_t = FormatArg::Jpeg)]
        format: FormatArg,
    },
    /// Synthesize videos from still images or looping video sources
    ImageVideo {
        /// Image/video file or directory
        input: PathBuf,
        /// Quality preset label, e.g. 720p or "instagram square"
        #[arg(long, default_value = "720p")]
        quality: String,
        /// How to fit the source into the target frame
        #[arg(long, value_enum, default_value_t = ScalingArg::Stretch)]
        scaling: ScalingArg,
        /// Loop construction for video sources
        #[arg(long = "loop", value_enum, default_value_t = LoopArg::Forward)]
        loop_mode: LoopArg,
        /// Output duration in seconds (defaults to the source duration)
        #[arg(long)]
        duration: Option<f64>,
        /// Video codec
        #[arg(long, value_enum, default_value_t = CodecArg::H264)]
        codec: CodecArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContainerArg {
    Mp3,
    Wav,
    Flac,
    M4a,
    Ogg,
}

impl From<ContainerArg> for AudioContainer {
    fn from(value: ContainerArg) -> Self {
        match value {
            ContainerArg::Mp3 => AudioContainer::Mp3,
            ContainerArg::Wav => AudioContainer::Wav,
            ContainerArg::Flac => AudioContainer::Flac,
            ContainerArg::M4a => AudioContainer::M4a,
            ContainerArg::Ogg => AudioContainer::Ogg,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PositionArg {
    Center,
    Top,
    Bottom,
    Left,
    Right,
}

impl From<PositionArg> for CropPosition {
    fn from(value: PositionArg) -> Self {
        match value {
            PositionArg::Center => CropPosition::Center,
            PositionArg::Top => CropPosition::Top,
            PositionArg::Bottom => CropPosition::Bottom,
            PositionArg::Left => CropPosition::Left,
            PositionArg::Right => CropPosition::Right,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
    Mp4,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Mp4 => OutputFormat::Mp4,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScalingArg {
    Stretch,
    Expand,
    Truncate,
}

impl From<ScalingArg> for ScalingMode {
    fn from(value: ScalingArg) -> Self {
        match value {
            ScalingArg::Stretch => ScalingMode::Stretch,
            ScalingArg::Expand => ScalingMode::Expand,
            ScalingArg::Truncate => ScalingMode::Truncate,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LoopArg {
    Forward,
    ForwardReverse,
}

impl From<LoopArg> for LoopMode {
    fn from(value: LoopArg) -> Self {
        match value {
            LoopArg::Forward => LoopMode::Forward,
            LoopArg::ForwardReverse => LoopMode::ForwardReverse,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CodecArg {
    H264,
    H265,
    Vp9,
}

impl From<CodecArg> for VideoCodec {
    fn from(value: CodecArg) -> Self {
        match value {
            CodecArg::H264 => VideoCodec::H264,
            CodecArg::H265 => VideoCodec::H265,
            CodecArg::Vp9 => VideoCodec::Vp9,
        }
    }
}

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "aac", "opus"];

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(output_dir) = &args.output_dir {
        config.output.output_dir = output_dir.clone();
    }
    if let Some(jobs) = args.jobs {
        config.jobs.concurrency = jobs;
    }

    let specs = match build_specs(&args.command) {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if specs.is_empty() {
        eprintln!("No matching input files found");
        return ExitCode::FAILURE;
    }

    let options = BatchOptions::from_config(&config);
    let runner = BatchRunner::new(
        FfmpegInvoker::new(config.tools.ffmpeg_path.clone()),
        FfprobeProber::new(config.tools.ffprobe_path.clone()),
        options,
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested, stopping jobs...");
            ctrl_c_cancel.cancel();
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx));

    let summary = match runner.run(specs, events_tx, cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "batch aborted");
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _ = printer.await;

    print_summary(&summary);
    if summary.failed > 0 || summary.cancelled > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn build_specs(command: &Command) -> Result<Vec<TransformSpec>, String> {
    let (input, allowed): (&PathBuf, &[&str]) = match command {
        Command::SpeedPitch { input, .. } | Command::Transcode { input, .. } => {
            (input, AUDIO_EXTENSIONS)
        }
        Command::Aspect { input, .. } | Command::ImageVideo { input, .. } => {
            (input, &VISUAL_EXTENSIONS)
        }
    };
    let inputs = expand_inputs(input, allowed)?;

    inputs
        .into_iter()
        .map(|path| {
            let kind = match command {
                Command::SpeedPitch {
                    speed,
                    pitch,
                    bitrate,
                    ..
                } => TransformKind::SpeedPitch {
                    speed_percent: *speed,
                    pitch_semitones: *pitch,
                    bitrate_label: bitrate.clone(),
                },
                Command::Transcode {
                    format, bitrate, ..
                } => TransformKind::Transcode {
                    bitrate_label: bitrate.clone(),
                    container: (*format).into(),
                },
                Command::Aspect {
                    ratio,
                    position,
                    format,
                    ..
                } => TransformKind::AspectConvert {
                    aspect: parse_ratio(ratio)?,
                    crop_position: (*position).into(),
                    output_format: (*format).into(),
                },
                Command::ImageVideo {
                    quality,
                    scaling,
                    loop_mode,
                    duration,
                    codec,
                    ..
                } => TransformKind::ImageToVideo {
                    quality_label: quality.clone(),
                    scaling_mode: (*scaling).into(),
                    loop_mode: (*loop_mode).into(),
                    duration_secs: *duration,
                    codec: (*codec).into(),
                },
            };
            TransformSpec::new(path, kind).map_err(|e: SpecError| e.to_string())
        })
        .collect()
}

/// Extensions accepted by the visual subcommands
const VISUAL_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "bmp", "webp", "mp4", "mov", "mkv", "avi", "webm",
];

/// Expand a file or directory argument into concrete input paths.
///
/// A file is taken as-is; a directory is walked recursively and filtered
/// by extension, sorted so batches are deterministic.
fn expand_inputs(input: &Path, allowed: &[&str]) -> Result<Vec<PathBuf>, String> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(format!("input path '{}' does not exist", input.display()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| allowed.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Parse a ratio argument like "16:9" or "16x9"
fn parse_ratio(raw: &str) -> Result<AspectRatio, String> {
    let (w, h) = raw
        .split_once(':')
        .or_else(|| raw.split_once('x'))
        .ok_or_else(|| format!("invalid aspect ratio '{raw}', expected W:H"))?;
    let w: u32 = w
        .trim()
        .parse()
        .map_err(|_| format!("invalid aspect ratio width in '{raw}'"))?;
    let h: u32 = h
        .trim()
        .parse()
        .map_err(|_| format!("invalid aspect ratio height in '{raw}'"))?;
    AspectRatio::new(w, h).map_err(|e| e.to_string())
}

/// Print job events as they arrive, one line per state change and one
/// per ten percent of progress
async fn print_events(mut events: mpsc::UnboundedReceiver<BatchEvent>) {
    let mut last_decile = HashMap::new();
    while let Some(event) = events.recv().await {
        match event {
            BatchEvent::JobUpdate {
                id,
                input,
                state,
                percent,
                message,
            } => {
                let name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| input.display().to_string());
                match state {
                    JobState::Running => {
                        let decile = (percent / 10.0) as u32;
                        let seen = last_decile.entry(id).or_insert(0);
                        if percent == 0.0 || decile > *seen {
                            *seen = decile;
                            println!("[{percent:>5.1}%] {name}");
                        }
                    }
                    JobState::Failed => {
                        println!(
                            "[FAILED] {name}: {}",
                            message.unwrap_or_else(|| "unknown error".to_string())
                        );
                    }
                    _ => println!("[{}] {name}", state.as_str()),
                }
            }
            BatchEvent::BatchDone { .. } => break,
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "\n{} job(s): {} succeeded, {} failed, {} cancelled",
        summary.total, summary.succeeded, summary.failed, summary.cancelled
    );
}
