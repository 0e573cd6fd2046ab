//! MediaForge engine
//!
//! Compiles media transformation requests into ffmpeg filter graphs and
//! runs them as supervised child processes with bounded concurrency.
//!
//! The pipeline is linear: a [`spec::TransformSpec`] plus a probed
//! [`probe::SourceInfo`] compile into a [`compile::FilterGraph`], which the
//! [`ffmpeg::Invoker`] renders to an argument vector and executes. The
//! [`batch::BatchRunner`] drives many of these jobs at once and publishes
//! [`batch::BatchEvent`]s as they progress.

pub mod batch;
pub mod compile;
pub mod concurrency;
pub mod ffmpeg;
pub mod naming;
pub mod probe;
pub mod quality;
pub mod spec;

pub use batch::{BatchEvent, BatchOptions, BatchRunner, BatchSummary, JobState};
pub use compile::{FilterGraph, FilterGraphCompiler};
pub use ffmpeg::{FfmpegInvoker, Invoker};
pub use naming::OutputNamer;
pub use probe::{FfprobeProber, MediaProber, SourceInfo};
pub use quality::{QualityRegistry, QualityTarget};
pub use spec::{TransformKind, TransformSpec};
