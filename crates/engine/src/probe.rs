//! Media probing via ffprobe
//!
//! Compilation needs a handful of facts about the source file: its
//! dimensions, duration, and whether it is a still image. `FfprobeProber`
//! gathers them with one `ffprobe` invocation; tests substitute a fake
//! through the `MediaProber` trait.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Error type for probing operations
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe binary '{0}' could not be started: {1}")]
    ToolNotFound(String, #[source] std::io::Error),
    #[error("ffprobe exited with {status} for {path}: {stderr}")]
    ProbeFailed {
        path: String,
        status: String,
        stderr: String,
    },
    #[error("failed to parse ffprobe output for {path}: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no decodable streams found in {0}")]
    NoStreams(String),
}

/// Facts about a source file that compilation depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    /// Total duration in seconds, absent for still images
    pub duration_secs: Option<f64>,
    /// Video/image frame width, absent for audio-only sources
    pub width: Option<u32>,
    /// Video/image frame height, absent for audio-only sources
    pub height: Option<u32>,
    /// True when the source is a single still image rather than a video
    pub is_still_image: bool,
    pub has_audio: bool,
    pub has_video: bool,
}

impl SourceInfo {
    /// Frame dimensions when the source carries a visual stream
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

/// Source-inspection seam, implemented by `FfprobeProber` in production
pub trait MediaProber {
    fn probe(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = Result<SourceInfo, ProbeError>> + Send;
}

/// Probes files by running ffprobe and parsing its JSON output
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: String,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

/// Demuxers ffprobe reports for single still images
const IMAGE_FORMAT_MARKERS: &[&str] = &["image2", "png_pipe", "jpeg_pipe", "bmp_pipe", "webp_pipe"];

impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<SourceInfo, ProbeError> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProbeError::ToolNotFound(self.ffprobe_path.clone(), e))?;

        let path_str = path.display().to_string();
        if !output.status.success() {
            return Err(ProbeError::ProbeFailed {
                path: path_str,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: FfprobeOutput =
            serde_json::from_slice(&output.stdout).map_err(|source| ProbeError::ParseFailed {
                path: path_str.clone(),
                source,
            })?;

        let info = interpret(&parsed).ok_or(ProbeError::NoStreams(path_str))?;
        debug!(path = %path.display(), ?info, "probed source");
        Ok(info)
    }
}

fn interpret(parsed: &FfprobeOutput) -> Option<SourceInfo> {
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));
    if video.is_none() && !has_audio {
        return None;
    }

    let format_name = parsed
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .unwrap_or("");
    let is_still_image = video.is_some()
        && IMAGE_FORMAT_MARKERS
            .iter()
            .any(|marker| format_name.split(',').any(|name| name == *marker));

    let duration_secs = if is_still_image {
        None
    } else {
        parsed
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .or_else(|| parsed.streams.iter().find_map(|s| s.duration.as_deref()))
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| *d > 0.0)
    };

    Some(SourceInfo {
        duration_secs,
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        is_still_image,
        has_audio,
        has_video: video.is_some(),
    })
}
