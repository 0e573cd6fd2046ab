//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Output folder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Directory transformed files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("converted_changed")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobsConfig {
    /// Maximum concurrent transformation jobs (0 = auto-derive from cores)
    #[serde(default)]
    pub concurrency: u32,
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Path or command name for the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Path or command name for the ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// Audio output defaults shared by all audio transformations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Output channel count
    #[serde(default = "default_channels")]
    pub channels: u8,
    /// Bitrate label used when a spec does not name one
    #[serde(default = "default_bitrate")]
    pub default_bitrate: String,
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u8 {
    2
}

fn default_bitrate() -> String {
    "192k".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            default_bitrate: default_bitrate(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MEDIAFORGE_OUTPUT_DIR -> output.output_dir
    /// - MEDIAFORGE_CONCURRENCY -> jobs.concurrency
    /// - MEDIAFORGE_FFMPEG_PATH -> tools.ffmpeg_path
    /// - MEDIAFORGE_FFPROBE_PATH -> tools.ffprobe_path
    /// - MEDIAFORGE_AUDIO_BITRATE -> audio.default_bitrate
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MEDIAFORGE_OUTPUT_DIR") {
            if !val.is_empty() {
                self.output.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MEDIAFORGE_CONCURRENCY") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.jobs.concurrency = jobs;
            }
        }

        if let Ok(val) = env::var("MEDIAFORGE_FFMPEG_PATH") {
            if !val.is_empty() {
                self.tools.ffmpeg_path = val;
            }
        }

        if let Ok(val) = env::var("MEDIAFORGE_FFPROBE_PATH") {
            if !val.is_empty() {
                self.tools.ffprobe_path = val;
            }
        }

        if let Ok(val) = env::var("MEDIAFORGE_AUDIO_BITRATE") {
            if !val.is_empty() {
                self.audio.default_bitrate = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }
}
