//! Filter graph compilation
//!
//! Turns a validated `TransformSpec` plus probed `SourceInfo` into a
//! `FilterGraph`: the input directive, filter chains, and output settings
//! that the invoker later renders into ffmpeg arguments. Compilation is
//! pure; it never touches the filesystem or spawns anything.

use crate::probe::SourceInfo;
use crate::quality::{QualityError, QualityRegistry, QualityTarget};
use crate::spec::{
    AspectRatio, CropPosition, LoopMode, OutputFormat, ScalingMode, TransformKind, TransformSpec,
};
use thiserror::Error;

/// Error type for compilation
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Quality(#[from] QualityError),
    #[error("{operation} requires a video or image stream, but '{path}' has none")]
    MissingVideoStream { operation: &'static str, path: String },
    #[error("{operation} requires an audio stream, but '{path}' has none")]
    MissingAudioStream { operation: &'static str, path: String },
    #[error("still image source '{path}' needs an explicit duration")]
    MissingDuration { path: String },
    #[error("cannot produce {target} output from still image '{path}'")]
    UnsupportedCombination { target: &'static str, path: String },
}

/// How the source file is fed to ffmpeg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDirective {
    /// Read once, no looping flags
    Plain,
    /// Still image looped indefinitely (`-loop 1`)
    LoopImage,
    /// Video source looped indefinitely (`-stream_loop -1`)
    LoopVideo,
}

/// Rendered output parameters, one field per ffmpeg output flag group
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputSettings {
    pub video_codec: Option<&'static str>,
    pub audio_codec: Option<&'static str>,
    /// Applied only for lossy targets
    pub audio_bitrate: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub pix_fmt: Option<&'static str>,
    pub frame_rate: Option<u32>,
    /// Cut the output at this many seconds (`-t`)
    pub duration_secs: Option<f64>,
    /// Drop the video stream (`-vn`)
    pub drop_video: bool,
    /// Drop the audio stream (`-an`)
    pub drop_audio: bool,
}

/// A filter_complex script together with the label to map as video output
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexGraph {
    pub script: String,
    pub video_label: String,
}

/// Complete compiled description of one transformation
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub input_directive: InputDirective,
    /// Simple video filter chain (`-vf`), empty when unused
    pub video_filters: Vec<String>,
    /// Simple audio filter chain (`-af`), empty when unused
    pub audio_filters: Vec<String>,
    /// Multi-branch graph (`-filter_complex`); replaces the simple chains
    pub complex: Option<ComplexGraph>,
    pub output: OutputSettings,
    /// Predicted output duration, used for progress percentages
    pub expected_duration_secs: Option<f64>,
}

/// Net tempo this close to 1.0 compiles to no atempo stage at all
const TEMPO_IDENTITY_EPSILON: f64 = 1e-9;

/// Decompose a net tempo factor into stages ffmpeg's atempo accepts.
///
/// Every stage lies in [0.5, 2.0] and the stage product equals the input
/// factor (within float rounding). Factors on a power-of-two boundary
/// decompose into exact stages, e.g. 4.0 becomes [2.0, 2.0].
pub fn decompose_tempo(factor: f64) -> Vec<f64> {
    let mut remaining = factor;
    let mut stages = Vec::new();
    while remaining > 2.0 {
        stages.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push(0.5);
        remaining /= 0.5;
    }
    stages.push(remaining);
    stages
}

/// Compiles transform specs into filter graphs
#[derive(Debug, Default)]
pub struct FilterGraphCompiler {
    quality: QualityRegistry,
    sample_rate: u32,
    channels: u8,
}

impl FilterGraphCompiler {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            quality: QualityRegistry::new(),
            sample_rate,
            channels,
        }
    }

    pub fn compile(
        &self,
        spec: &TransformSpec,
        source: &SourceInfo,
    ) -> Result<FilterGraph, CompileError> {
        match &spec.kind {
            TransformKind::SpeedPitch { bitrate_label, .. } => {
                self.compile_speed_pitch(spec, source, bitrate_label)
            }
            TransformKind::Transcode {
                bitrate_label,
                container,
            } => self.compile_transcode(spec, source, bitrate_label, *container),
            TransformKind::AspectConvert {
                aspect,
                crop_position,
                output_format,
            } => self.compile_aspect(spec, source, *aspect, *crop_position, *output_format),
            TransformKind::ImageToVideo {
                quality_label,
                scaling_mode,
                loop_mode,
                duration_secs,
                codec,
            } => self.compile_image_to_video(
                spec,
                source,
                quality_label,
                *scaling_mode,
                *loop_mode,
                *duration_secs,
                *codec,
            ),
        }
    }

    fn compile_speed_pitch(
        &self,
        spec: &TransformSpec,
        source: &SourceInfo,
        bitrate_label: &str,
    ) -> Result<FilterGraph, CompileError> {
        require_audio(spec, source, "speed/pitch adjustment")?;
        let bitrate = self.quality.resolve_bitrate(bitrate_label)?;

        let rate_factor = spec.pitch_rate_factor();
        let net_tempo = spec.speed_factor() / rate_factor;

        let mut audio_filters = Vec::new();
        if (rate_factor - 1.0).abs() > TEMPO_IDENTITY_EPSILON {
            // Resampling shifts pitch and tempo together; the atempo chain
            // below compensates so only the requested changes remain.
            audio_filters.push(format!(
                "asetrate={}*{}",
                self.sample_rate,
                format_factor(rate_factor)
            ));
            audio_filters.push(format!("aresample={}", self.sample_rate));
        }
        if (net_tempo - 1.0).abs() > TEMPO_IDENTITY_EPSILON {
            for stage in decompose_tempo(net_tempo) {
                audio_filters.push(format!("atempo={}", format_factor(stage)));
            }
        }

        let expected = source
            .duration_secs
            .map(|d| d / spec.speed_factor())
            .filter(|d| *d > 0.0);

        Ok(FilterGraph {
            input_directive: InputDirective::Plain,
            video_filters: Vec::new(),
            audio_filters,
            complex: None,
            output: OutputSettings {
                audio_bitrate: Some(bitrate),
                sample_rate: Some(self.sample_rate),
                channels: Some(self.channels),
                drop_video: true,
                ..Default::default()
            },
            expected_duration_secs: expected,
        })
    }

    fn compile_transcode(
        &self,
        spec: &TransformSpec,
        source: &SourceInfo,
        bitrate_label: &str,
        container: crate::spec::AudioContainer,
    ) -> Result<FilterGraph, CompileError> {
        require_audio(spec, source, "transcoding")?;
        let bitrate = self.quality.resolve_bitrate(bitrate_label)?;

        Ok(FilterGraph {
            input_directive: InputDirective::Plain,
            video_filters: Vec::new(),
            audio_filters: Vec::new(),
            complex: None,
            output: OutputSettings {
                audio_codec: Some(container.encoder_name()),
                audio_bitrate: (!container.is_lossless()).then_some(bitrate),
                sample_rate: Some(self.sample_rate),
                channels: Some(self.channels),
                drop_video: true,
                ..Default::default()
            },
            expected_duration_secs: source.duration_secs,
        })
    }

    fn compile_aspect(
        &self,
        spec: &TransformSpec,
        source: &SourceInfo,
        aspect: AspectRatio,
        crop_position: CropPosition,
        output_format: OutputFormat,
    ) -> Result<FilterGraph, CompileError> {
        let (src_w, src_h) = require_dimensions(spec, source, "aspect conversion")?;
        if output_format == OutputFormat::Mp4 && source.is_still_image {
            return Err(CompileError::UnsupportedCombination {
                target: "video",
                path: spec.input.display().to_string(),
            });
        }

        let window = crop_window(src_w, src_h, aspect, crop_position);
        let mut video_filters = Vec::new();
        if window.w != src_w || window.h != src_h {
            video_filters.push(format!(
                "crop={}:{}:{}:{}",
                window.w, window.h, window.x, window.y
            ));
        }

        let target = standard_resolution(&self.quality, aspect, window.w, window.h);
        if target.width != window.w || target.height != window.h {
            video_filters.push(format!("scale={}:{}", target.width, target.height));
        }

        let video_out = output_format == OutputFormat::Mp4;
        Ok(FilterGraph {
            input_directive: InputDirective::Plain,
            video_filters,
            audio_filters: Vec::new(),
            complex: None,
            output: OutputSettings {
                video_codec: video_out.then_some("libx264"),
                pix_fmt: video_out.then_some("yuv420p"),
                drop_audio: !video_out || !source.has_audio,
                ..Default::default()
            },
            expected_duration_secs: source.duration_secs,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_image_to_video(
        &self,
        spec: &TransformSpec,
        source: &SourceInfo,
        quality_label: &str,
        scaling_mode: ScalingMode,
        loop_mode: LoopMode,
        duration_secs: Option<f64>,
        codec: crate::spec::VideoCodec,
    ) -> Result<FilterGraph, CompileError> {
        let _ = require_dimensions(spec, source, "video synthesis")?;
        let image_dims = source.is_still_image.then(|| source.dimensions()).flatten();
        let target = self.quality.resolve(quality_label, image_dims)?;

        let duration = match duration_secs.or(source.duration_secs) {
            Some(d) => d,
            None => {
                return Err(CompileError::MissingDuration {
                    path: spec.input.display().to_string(),
                })
            }
        };

        let mut scaling = scale_filters(scaling_mode, target);
        scaling.push("setsar=1".to_string());

        // Ping-pong only makes sense for a moving source; a still image
        // is its own reverse.
        if !source.is_still_image && loop_mode == LoopMode::ForwardReverse {
            let mut script = String::from("[0:v]split[fwd][tmp];[tmp]reverse[rev];");
            script.push_str("[fwd][rev]concat=n=2:v=1:a=0,loop=loop=-1:size=32767,");
            script.push_str(&format!("trim=duration={}", format_factor(duration)));
            for stage in &scaling {
                script.push(',');
                script.push_str(stage);
            }
            script.push_str("[vout]");
            return Ok(FilterGraph {
                input_directive: InputDirective::Plain,
                video_filters: Vec::new(),
                audio_filters: Vec::new(),
                complex: Some(ComplexGraph {
                    script,
                    video_label: "[vout]".to_string(),
                }),
                output: OutputSettings {
                    video_codec: Some(codec.encoder_name()),
                    pix_fmt: Some("yuv420p"),
                    frame_rate: Some(30),
                    drop_audio: true,
                    ..Default::default()
                },
                expected_duration_secs: Some(duration),
            });
        }

        let input_directive = if source.is_still_image {
            InputDirective::LoopImage
        } else {
            InputDirective::LoopVideo
        };

        Ok(FilterGraph {
            input_directive,
            video_filters: scaling,
            audio_filters: Vec::new(),
            complex: None,
            output: OutputSettings {
                video_codec: Some(codec.encoder_name()),
                pix_fmt: Some("yuv420p"),
                frame_rate: Some(30),
                duration_secs: Some(duration),
                drop_audio: true,
                ..Default::default()
            },
            expected_duration_secs: Some(duration),
        })
    }
}

struct CropWindow {
    w: u32,
    h: u32,
    x: u32,
    y: u32,
}

/// Largest window of the target ratio that fits the source, anchored at
/// the requested position. Even dimensions keep yuv420p encoders happy.
fn crop_window(src_w: u32, src_h: u32, aspect: AspectRatio, position: CropPosition) -> CropWindow {
    let src_ratio = src_w as f64 / src_h as f64;
    let target_ratio = aspect.value();

    let (mut w, mut h) = if src_ratio > target_ratio {
        (((src_h as f64 * target_ratio).round() as u32).min(src_w), src_h)
    } else {
        (src_w, ((src_w as f64 / target_ratio).round() as u32).min(src_h))
    };
    w -= w % 2;
    h -= h % 2;

    let slack_x = src_w - w;
    let slack_y = src_h - h;
    let (x, y) = match position {
        CropPosition::Center => (slack_x / 2, slack_y / 2),
        CropPosition::Top => (slack_x / 2, 0),
        CropPosition::Bottom => (slack_x / 2, slack_y),
        CropPosition::Left => (0, slack_y / 2),
        CropPosition::Right => (slack_x, slack_y / 2),
    };

    CropWindow { w, h, x, y }
}

/// Pick the registry preset with the same ratio whose area is closest to
/// the cropped source, or keep the cropped size when no preset matches.
fn standard_resolution(
    quality: &QualityRegistry,
    aspect: AspectRatio,
    cropped_w: u32,
    cropped_h: u32,
) -> QualityTarget {
    let target_ratio = aspect.value();
    let cropped_area = cropped_w as i64 * cropped_h as i64;

    quality
        .video_labels()
        .iter()
        .filter_map(|label| quality.resolve(label, None).ok())
        .filter(|t| (t.width as f64 / t.height as f64 - target_ratio).abs() < 1e-3)
        .min_by_key(|t| (t.width as i64 * t.height as i64 - cropped_area).abs())
        .unwrap_or(QualityTarget::new(cropped_w, cropped_h))
}

/// Scaling stages for a target frame, one variant per `ScalingMode`
fn scale_filters(mode: ScalingMode, target: QualityTarget) -> Vec<String> {
    let (w, h) = (target.width, target.height);
    match mode {
        ScalingMode::Stretch => vec![format!("scale={w}:{h}")],
        ScalingMode::Expand => vec![
            format!("scale={w}:{h}:force_original_aspect_ratio=decrease"),
            format!("pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black"),
        ],
        ScalingMode::Truncate => vec![
            format!("scale={w}:{h}:force_original_aspect_ratio=increase"),
            format!("crop={w}:{h}"),
        ],
    }
}

/// Render a factor without trailing zeros, six decimals max
fn format_factor(value: f64) -> String {
    let rendered = format!("{value:.6}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

fn require_audio(
    spec: &TransformSpec,
    source: &SourceInfo,
    operation: &'static str,
) -> Result<(), CompileError> {
    if source.has_audio {
        Ok(())
    } else {
        Err(CompileError::MissingAudioStream {
            operation,
            path: spec.input.display().to_string(),
        })
    }
}

fn require_dimensions(
    spec: &TransformSpec,
    source: &SourceInfo,
    operation: &'static str,
) -> Result<(u32, u32), CompileError> {
    source
        .dimensions()
        .ok_or_else(|| CompileError::MissingVideoStream {
            operation,
            path: spec.input.display().to_string(),
        })
}
