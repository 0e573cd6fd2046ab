//! Output path derivation
//!
//! Each transformation kind has a fixed naming pattern built from the
//! source stem. Derived paths never clobber anything: an existing file,
//! or the input itself, pushes the name to a `_2`, `_3`, ... variant.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::spec::{TransformKind, TransformSpec};

/// Error type for name derivation
#[derive(Debug, Error)]
pub enum NamingError {
    #[error("input path '{0}' has no file stem")]
    MissingStem(String),
    #[error("input path '{0}' has no file extension")]
    MissingExtension(String),
}

/// Derives collision-free output paths for transform specs
#[derive(Debug, Default)]
pub struct OutputNamer;

impl OutputNamer {
    pub fn new() -> Self {
        Self
    }

    /// Derive the output path for `spec`, placed under `output_dir`.
    ///
    /// The first free variant of the pattern is returned; "free" means no
    /// file exists there and the path is not the input itself.
    pub fn derive(&self, spec: &TransformSpec, output_dir: &Path) -> Result<PathBuf, NamingError> {
        let input = &spec.input;
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| NamingError::MissingStem(input.display().to_string()))?;

        let (base, extension) = match &spec.kind {
            TransformKind::SpeedPitch {
                speed_percent,
                pitch_semitones,
                ..
            } => {
                let ext = input
                    .extension()
                    .and_then(|e| e.to_str())
                    .ok_or_else(|| NamingError::MissingExtension(input.display().to_string()))?;
                (
                    format!(
                        "{stem}_speed{}pct_pitch{}st",
                        format_signed(*speed_percent),
                        format_signed(*pitch_semitones)
                    ),
                    ext.to_string(),
                )
            }
            TransformKind::Transcode { container, .. } => {
                (stem.to_string(), container.extension().to_string())
            }
            TransformKind::AspectConvert {
                aspect,
                output_format,
                ..
            } => (
                format!("{stem}_{}x{}", aspect.w, aspect.h),
                output_format.extension().to_string(),
            ),
            TransformKind::ImageToVideo { .. } => (format!("{stem}_video"), "mp4".to_string()),
        };

        Ok(first_free(output_dir, input, &base, &extension))
    }
}

/// Walk `_2`, `_3`, ... until the candidate neither exists nor aliases
/// the input
fn first_free(output_dir: &Path, input: &Path, base: &str, extension: &str) -> PathBuf {
    let mut counter = 1u32;
    loop {
        let name = if counter == 1 {
            format!("{base}.{extension}")
        } else {
            format!("{base}_{counter}.{extension}")
        };
        let candidate = output_dir.join(name);
        if !candidate.exists() && candidate != input {
            return candidate;
        }
        counter += 1;
    }
}

/// Render a signed adjustment without trailing zeros: "+25", "-7.5", "+0"
fn format_signed(value: f64) -> String {
    let rendered = format!("{value:+.2}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}
