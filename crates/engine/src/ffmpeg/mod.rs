//! ffmpeg process integration
//!
//! `args` renders a compiled `FilterGraph` into a deterministic argument
//! vector; `invoke` owns spawning, progress parsing, cancellation, and
//! exit handling.

pub mod args;
pub mod invoke;

pub use args::build_ffmpeg_args;
pub use invoke::{ExecOutcome, FfmpegInvoker, Invocation, InvokeError, Invoker};
