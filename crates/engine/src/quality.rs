//! Quality preset registry
//!
//! Maps user-facing quality labels onto concrete encode targets. Video
//! labels resolve to pixel dimensions, audio labels to bitrates. Two
//! labels are source-dependent: `Auto` and `Image Size` need the probed
//! dimensions of the input to resolve.

use thiserror::Error;

/// Error type for quality resolution
#[derive(Debug, Error)]
pub enum QualityError {
    #[error("unknown quality label '{0}'")]
    UnknownLabel(String),
    #[error("quality label '{0}' needs source dimensions but none were provided")]
    MissingSourceDimensions(String),
}

/// Resolved encode target for a video quality label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityTarget {
    pub width: u32,
    pub height: u32,
}

impl QualityTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Fixed-dimension video presets, in presentation order
const VIDEO_PRESETS: &[(&str, u32, u32)] = &[
    ("480p", 854, 480),
    ("720p", 1280, 720),
    ("1080p", 1920, 1080),
    ("mobile portrait", 720, 1280),
    ("mobile landscape", 1280, 720),
    ("instagram square", 1080, 1080),
    ("instagram story", 1080, 1920),
    ("portrait 2:3", 720, 1080),
    ("landscape 3:2", 1080, 720),
];

/// Supported audio bitrate labels
const AUDIO_BITRATES: &[&str] = &["128k", "192k", "256k", "320k"];

/// Fallback target when `Auto` resolves against a non-still source
const AUTO_FALLBACK: QualityTarget = QualityTarget {
    width: 1280,
    height: 720,
};

/// Registry of known quality labels
#[derive(Debug, Default)]
pub struct QualityRegistry;

impl QualityRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a video quality label to pixel dimensions.
    ///
    /// `image_dims` carries the probed dimensions of the source when it is
    /// a still image; `Auto` uses them directly and falls back to 720p for
    /// video sources, while `Image Size` requires them.
    pub fn resolve(
        &self,
        label: &str,
        image_dims: Option<(u32, u32)>,
    ) -> Result<QualityTarget, QualityError> {
        let normalized = label.trim().to_ascii_lowercase();

        if let Some((_, w, h)) = VIDEO_PRESETS.iter().find(|(name, _, _)| *name == normalized) {
            return Ok(QualityTarget::new(*w, *h));
        }

        match normalized.as_str() {
            "auto" => Ok(match image_dims {
                Some((w, h)) => QualityTarget::new(w, h),
                None => AUTO_FALLBACK,
            }),
            "image size" => match image_dims {
                Some((w, h)) => Ok(QualityTarget::new(w, h)),
                None => Err(QualityError::MissingSourceDimensions(label.to_string())),
            },
            _ => Err(QualityError::UnknownLabel(label.to_string())),
        }
    }

    /// Validate an audio bitrate label ("128k" through "320k")
    pub fn resolve_bitrate(&self, label: &str) -> Result<String, QualityError> {
        let normalized = label.trim().to_ascii_lowercase();
        if AUDIO_BITRATES.contains(&normalized.as_str()) {
            Ok(normalized)
        } else {
            Err(QualityError::UnknownLabel(label.to_string()))
        }
    }

    /// All video labels the registry knows, for CLI help output
    pub fn video_labels(&self) -> Vec<&'static str> {
        let mut labels: Vec<&'static str> =
            VIDEO_PRESETS.iter().map(|(name, _, _)| *name).collect();
        labels.push("auto");
        labels.push("image size");
        labels
    }

    /// All audio bitrate labels the registry knows
    pub fn audio_labels(&self) -> &'static [&'static str] {
        AUDIO_BITRATES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_presets_resolve() {
        let reg = QualityRegistry::new();
        assert_eq!(reg.resolve("720p", None).unwrap(), QualityTarget::new(1280, 720));
        assert_eq!(
            reg.resolve("Instagram Story", None).unwrap(),
            QualityTarget::new(1080, 1920)
        );
        assert_eq!(
            reg.resolve("portrait 2:3", None).unwrap(),
            QualityTarget::new(720, 1080)
        );
    }

    #[test]
    fn test_resolution_is_case_insensitive() {
        let reg = QualityRegistry::new();
        assert_eq!(
            reg.resolve("MOBILE PORTRAIT", None).unwrap(),
            reg.resolve("mobile portrait", None).unwrap()
        );
    }

    #[test]
    fn test_auto_prefers_image_dims() {
        let reg = QualityRegistry::new();
        assert_eq!(
            reg.resolve("auto", Some((640, 360))).unwrap(),
            QualityTarget::new(640, 360)
        );
        assert_eq!(reg.resolve("auto", None).unwrap(), QualityTarget::new(1280, 720));
    }

    #[test]
    fn test_image_size_requires_dims() {
        let reg = QualityRegistry::new();
        assert_eq!(
            reg.resolve("image size", Some((3000, 2000))).unwrap(),
            QualityTarget::new(3000, 2000)
        );
        assert!(matches!(
            reg.resolve("image size", None),
            Err(QualityError::MissingSourceDimensions(_))
        ));
    }

    #[test]
    fn test_unknown_label_rejected() {
        let reg = QualityRegistry::new();
        assert!(matches!(
            reg.resolve("4k", None),
            Err(QualityError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_bitrate_labels() {
        let reg = QualityRegistry::new();
        assert_eq!(reg.resolve_bitrate("320K").unwrap(), "320k");
        assert!(reg.resolve_bitrate("64k").is_err());
    }
}
