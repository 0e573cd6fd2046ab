//! Transformation specifications for MediaForge
//!
//! A `TransformSpec` is the immutable description of one requested
//! transformation, validated at construction. Numeric limits are rejected
//! here, before any compilation or process work starts.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Lowest accepted speed adjustment in percent
pub const MIN_SPEED_PERCENT: f64 = -50.0;
/// Highest accepted speed adjustment in percent
pub const MAX_SPEED_PERCENT: f64 = 100.0;
/// Pitch adjustment limit in semitones (symmetric)
pub const MAX_PITCH_SEMITONES: f64 = 12.0;

/// Error type for spec construction
#[derive(Debug, Error)]
pub enum SpecError {
    /// A numeric parameter fell outside its accepted range
    #[error("{name} = {value} is out of range [{min}, {max}]")]
    InvalidParameterRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Where to anchor the crop window when truncating to a new aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropPosition {
    Center,
    Top,
    Bottom,
    Left,
    Right,
}

/// How to fit source content into a differently-shaped target frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMode {
    /// Scale directly to the target, ignoring aspect ratio
    Stretch,
    /// Preserve aspect ratio, pad the remainder with black
    Expand,
    /// Preserve aspect ratio, crop whatever overflows the target
    Truncate,
}

/// Loop construction for video-sourced image-to-video jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Repeat the source forward and trim to the target duration
    Forward,
    /// Forward segment followed by its time-reverse, repeated (ping-pong)
    ForwardReverse,
}

/// Video codec selection, mapped to the backend's encoder names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    /// Encoder name understood by ffmpeg
    pub fn encoder_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
    }
}

/// Audio container targets for transcode jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContainer {
    Mp3,
    Wav,
    Flac,
    M4a,
    Ogg,
}

impl AudioContainer {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            AudioContainer::Mp3 => "mp3",
            AudioContainer::Wav => "wav",
            AudioContainer::Flac => "flac",
            AudioContainer::M4a => "m4a",
            AudioContainer::Ogg => "ogg",
        }
    }

    /// Encoder name understood by ffmpeg
    pub fn encoder_name(&self) -> &'static str {
        match self {
            AudioContainer::Mp3 => "libmp3lame",
            AudioContainer::Wav => "pcm_s16le",
            AudioContainer::Flac => "flac",
            AudioContainer::M4a => "aac",
            AudioContainer::Ogg => "libvorbis",
        }
    }

    /// Lossless targets ignore the requested bitrate
    pub fn is_lossless(&self) -> bool {
        matches!(self, AudioContainer::Wav | AudioContainer::Flac)
    }
}

/// Output format for aspect-ratio conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Mp4,
}

impl OutputFormat {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Mp4 => "mp4",
        }
    }
}

/// Target aspect ratio expressed as width:height components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub w: u32,
    pub h: u32,
}

impl AspectRatio {
    /// Build a ratio, rejecting zero components
    pub fn new(w: u32, h: u32) -> Result<Self, SpecError> {
        if w == 0 {
            return Err(SpecError::InvalidParameterRange {
                name: "aspect ratio width",
                value: w as f64,
                min: 1.0,
                max: f64::MAX,
            });
        }
        if h == 0 {
            return Err(SpecError::InvalidParameterRange {
                name: "aspect ratio height",
                value: h as f64,
                min: 1.0,
                max: f64::MAX,
            });
        }
        Ok(Self { w, h })
    }

    /// Width divided by height
    pub fn value(&self) -> f64 {
        self.w as f64 / self.h as f64
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.w, self.h)
    }
}

/// Kind-specific transformation parameters
#[derive(Debug, Clone, PartialEq)]
pub enum TransformKind {
    /// Change playback speed and/or pitch of an audio file
    SpeedPitch {
        /// Speed adjustment in percent, -50 to +100
        speed_percent: f64,
        /// Pitch adjustment in semitones, -12 to +12
        pitch_semitones: f64,
        /// Target audio bitrate label (e.g. "192k")
        bitrate_label: String,
    },
    /// Re-encode audio into a different container
    Transcode {
        bitrate_label: String,
        container: AudioContainer,
    },
    /// Convert an image or video to a new aspect ratio
    AspectConvert {
        aspect: AspectRatio,
        crop_position: CropPosition,
        output_format: OutputFormat,
    },
    /// Synthesize a video from a still image or looping video source
    ImageToVideo {
        quality_label: String,
        scaling_mode: ScalingMode,
        loop_mode: LoopMode,
        /// Target duration; derived from the probed source when None
        duration_secs: Option<f64>,
        codec: VideoCodec,
    },
}

/// One validated, immutable transformation request
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    /// Path to the source media file
    pub input: PathBuf,
    /// What to do with it
    pub kind: TransformKind,
}

impl TransformSpec {
    /// Build a spec, validating every numeric range up front.
    ///
    /// Out-of-range values are rejected here with `InvalidParameterRange`,
    /// never silently clamped.
    pub fn new(input: PathBuf, kind: TransformKind) -> Result<Self, SpecError> {
        match &kind {
            TransformKind::SpeedPitch {
                speed_percent,
                pitch_semitones,
                ..
            } => {
                check_range(
                    "speed_percent",
                    *speed_percent,
                    MIN_SPEED_PERCENT,
                    MAX_SPEED_PERCENT,
                )?;
                check_range(
                    "pitch_semitones",
                    *pitch_semitones,
                    -MAX_PITCH_SEMITONES,
                    MAX_PITCH_SEMITONES,
                )?;
            }
            TransformKind::ImageToVideo { duration_secs, .. } => {
                if let Some(secs) = duration_secs {
                    if !secs.is_finite() || *secs <= 0.0 {
                        return Err(SpecError::InvalidParameterRange {
                            name: "duration_secs",
                            value: *secs,
                            min: f64::MIN_POSITIVE,
                            max: f64::MAX,
                        });
                    }
                }
            }
            TransformKind::Transcode { .. } | TransformKind::AspectConvert { .. } => {}
        }

        Ok(Self { input, kind })
    }

    /// Playback speed multiplier requested by a SpeedPitch spec (1.0 = no change)
    pub fn speed_factor(&self) -> f64 {
        match &self.kind {
            TransformKind::SpeedPitch { speed_percent, .. } => 1.0 + speed_percent / 100.0,
            _ => 1.0,
        }
    }

    /// Resample rate multiplier implied by the requested pitch shift
    pub fn pitch_rate_factor(&self) -> f64 {
        match &self.kind {
            TransformKind::SpeedPitch {
                pitch_semitones, ..
            } => 2f64.powf(pitch_semitones / 12.0),
            _ => 1.0,
        }
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), SpecError> {
    if !value.is_finite() || value < min || value > max {
        return Err(SpecError::InvalidParameterRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn speed_pitch(speed: f64, pitch: f64) -> Result<TransformSpec, SpecError> {
        TransformSpec::new(
            PathBuf::from("/tmp/song.mp3"),
            TransformKind::SpeedPitch {
                speed_percent: speed,
                pitch_semitones: pitch,
                bitrate_label: "192k".to_string(),
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Any in-range speed/pitch pair constructs
        #[test]
        fn prop_in_range_speed_pitch_accepted(
            speed in MIN_SPEED_PERCENT..=MAX_SPEED_PERCENT,
            pitch in -MAX_PITCH_SEMITONES..=MAX_PITCH_SEMITONES,
        ) {
            prop_assert!(speed_pitch(speed, pitch).is_ok());
        }

        // The speed factor maps the percent range exactly onto [0.5, 2.0]
        #[test]
        fn prop_speed_factor_range(
            speed in MIN_SPEED_PERCENT..=MAX_SPEED_PERCENT,
        ) {
            let spec = speed_pitch(speed, 0.0).unwrap();
            let factor = spec.speed_factor();
            prop_assert!((0.5..=2.0).contains(&factor));
        }
    }

    #[test]
    fn test_out_of_range_speed_rejected() {
        assert!(matches!(
            speed_pitch(-50.1, 0.0),
            Err(SpecError::InvalidParameterRange { name: "speed_percent", .. })
        ));
        assert!(matches!(
            speed_pitch(100.5, 0.0),
            Err(SpecError::InvalidParameterRange { .. })
        ));
    }

    #[test]
    fn test_out_of_range_pitch_rejected() {
        assert!(speed_pitch(0.0, 12.5).is_err());
        assert!(speed_pitch(0.0, -13.0).is_err());
        assert!(speed_pitch(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_zero_aspect_ratio_rejected() {
        assert!(AspectRatio::new(0, 9).is_err());
        assert!(AspectRatio::new(16, 0).is_err());
        assert_eq!(AspectRatio::new(16, 9).unwrap().to_string(), "16:9");
    }

    #[test]
    fn test_nonpositive_duration_rejected() {
        let kind = |secs| TransformKind::ImageToVideo {
            quality_label: "720p".to_string(),
            scaling_mode: ScalingMode::Stretch,
            loop_mode: LoopMode::Forward,
            duration_secs: Some(secs),
            codec: VideoCodec::H264,
        };
        assert!(TransformSpec::new(PathBuf::from("/tmp/a.png"), kind(0.0)).is_err());
        assert!(TransformSpec::new(PathBuf::from("/tmp/a.png"), kind(-3.0)).is_err());
        assert!(TransformSpec::new(PathBuf::from("/tmp/a.png"), kind(12.0)).is_ok());
    }

    #[test]
    fn test_pitch_rate_factor_octave() {
        let up = speed_pitch(0.0, 12.0).unwrap();
        assert!((up.pitch_rate_factor() - 2.0).abs() < 1e-12);
        let down = speed_pitch(0.0, -12.0).unwrap();
        assert!((down.pitch_rate_factor() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_container_codec_mapping() {
        assert_eq!(AudioContainer::Mp3.encoder_name(), "libmp3lame");
        assert_eq!(AudioContainer::Flac.encoder_name(), "flac");
        assert!(AudioContainer::Flac.is_lossless());
        assert!(!AudioContainer::Ogg.is_lossless());
        assert_eq!(VideoCodec::Vp9.encoder_name(), "libvpx-vp9");
    }
}
