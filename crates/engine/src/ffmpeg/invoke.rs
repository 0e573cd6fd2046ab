//! ffmpeg process supervision
//!
//! Spawns ffmpeg with `-progress pipe:1`, parses the key=value progress
//! stream off stdout, drains stderr concurrently, and races the whole run
//! against a cancellation token. Killed or failed children never leave
//! orphans behind thanks to `kill_on_drop`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compile::FilterGraph;
use crate::ffmpeg::args::build_ffmpeg_args;

/// Stderr lines kept for failure reports
const STDERR_TAIL_LINES: usize = 20;

/// Error type for process invocation
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("ffmpeg binary '{path}' could not be started: {source}")]
    ToolNotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("i/o error while supervising ffmpeg: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr_tail}")]
    Failed { status: String, stderr_tail: String },
}

/// How a supervised run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Completed,
    Cancelled,
}

/// Everything one ffmpeg run needs
#[derive(Debug, Clone)]
pub struct Invocation {
    pub graph: FilterGraph,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Process-execution seam, implemented by `FfmpegInvoker` in production
pub trait Invoker {
    /// Verify the backing tool exists before any job is attempted
    fn preflight(&self) -> impl std::future::Future<Output = Result<(), InvokeError>> + Send;

    /// Run one invocation to completion, cancellation, or failure.
    ///
    /// `on_progress` receives monotonically non-decreasing percentages in
    /// [0, 100] whenever the expected duration is known.
    fn execute(
        &self,
        invocation: &Invocation,
        on_progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<ExecOutcome, InvokeError>> + Send;
}

/// Runs transformations by supervising real ffmpeg child processes
#[derive(Debug, Clone)]
pub struct FfmpegInvoker {
    ffmpeg_path: String,
}

impl FfmpegInvoker {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Invoker for FfmpegInvoker {
    async fn preflight(&self) -> Result<(), InvokeError> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| InvokeError::ToolNotFound {
                path: self.ffmpeg_path.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(InvokeError::Failed {
                status: output.status.to_string(),
                stderr_tail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn execute(
        &self,
        invocation: &Invocation,
        on_progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, InvokeError> {
        let args = build_ffmpeg_args(&invocation.graph, &invocation.input, &invocation.output);
        debug!(input = %invocation.input.display(), ?args, "spawning ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(InvokeError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            InvokeError::Spawn(std::io::Error::other("child stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            InvokeError::Spawn(std::io::Error::other("child stderr not captured"))
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        });

        let mut tracker = ProgressTracker::new(invocation.graph.expected_duration_secs);
        let mut stdout_lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to signal cancelled ffmpeg child");
                    }
                    let _ = child.wait().await;
                    stderr_task.abort();
                    return Ok(ExecOutcome::Cancelled);
                }
                line = stdout_lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(percent) = tracker.observe(&line) {
                            on_progress(percent);
                        }
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to signal cancelled ffmpeg child");
                }
                let _ = child.wait().await;
                stderr_task.abort();
                return Ok(ExecOutcome::Cancelled);
            }
            status = child.wait() => status?,
        };

        let tail = stderr_task.await.unwrap_or_default();
        if status.success() {
            on_progress(100.0);
            Ok(ExecOutcome::Completed)
        } else {
            Err(InvokeError::Failed {
                status: status.to_string(),
                stderr_tail: tail.into_iter().collect::<Vec<_>>().join("\n"),
            })
        }
    }
}

/// Converts ffmpeg progress lines into monotonic percentages
struct ProgressTracker {
    total_secs: Option<f64>,
    last_percent: f64,
}

impl ProgressTracker {
    fn new(total_secs: Option<f64>) -> Self {
        Self {
            total_secs: total_secs.filter(|t| *t > 0.0),
            last_percent: 0.0,
        }
    }

    /// Feed one stdout line; returns a percentage when it advanced
    fn observe(&mut self, line: &str) -> Option<f64> {
        let total = self.total_secs?;
        let position = parse_progress_line(line)?;
        let percent = (position / total * 100.0).clamp(0.0, 100.0);
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Extract the output position in seconds from one progress line.
///
/// `out_time_ms` holds microseconds despite its name; `out_time` is a
/// `HH:MM:SS.micro` timestamp kept as a fallback.
fn parse_progress_line(line: &str) -> Option<f64> {
    let (key, value) = line.split_once('=')?;
    match key.trim() {
        "out_time_ms" | "out_time_us" => value
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .map(|v| v as f64 / 1_000_000.0),
        "out_time" => parse_timestamp(value.trim()),
        _ => None,
    }
}

fn parse_timestamp(ts: &str) -> Option<f64> {
    let mut parts = ts.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
