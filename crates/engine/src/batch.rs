//! Batch execution
//!
//! Runs a list of transform specs with bounded concurrency. Each job
//! probes, compiles, and names its output before waiting on a worker
//! permit, so parameter problems are reported immediately while the fair
//! semaphore keeps invocations starting first-in first-out. Every state
//! change is published on an event channel; one failed job never touches
//! its neighbours.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use mediaforge_config::Config;

use crate::compile::FilterGraphCompiler;
use crate::concurrency::resolve_worker_count;
use crate::ffmpeg::{ExecOutcome, Invocation, InvokeError, Invoker};
use crate::naming::OutputNamer;
use crate::probe::MediaProber;
use crate::spec::TransformSpec;

/// Error type for batch-level failures (per-job failures are events)
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("tool preflight failed: {0}")]
    Preflight(#[source] InvokeError),
    #[error("cannot create output directory '{path}': {source}")]
    OutputDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// Progress and completion notifications published during a run
#[derive(Debug, Clone)]
pub enum BatchEvent {
    JobUpdate {
        id: Uuid,
        input: PathBuf,
        state: JobState,
        percent: f64,
        /// Failure detail, present only for `Failed`
        message: Option<String>,
    },
    BatchDone {
        succeeded: usize,
        failed: usize,
        cancelled: usize,
    },
}

/// Final tally of one batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Runtime knobs for a batch, usually taken from the loaded config
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub sample_rate: u32,
    pub channels: u8,
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.output.output_dir.clone(),
            workers: resolve_worker_count(config.jobs.concurrency),
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
        }
    }
}

enum JobEnd {
    Succeeded,
    Failed,
    Cancelled,
}

/// Executes batches of transformations against an invoker and prober
pub struct BatchRunner<I, P> {
    invoker: Arc<I>,
    prober: Arc<P>,
    compiler: Arc<FilterGraphCompiler>,
    options: BatchOptions,
}

impl<I, P> BatchRunner<I, P>
where
    I: Invoker + Send + Sync + 'static,
    P: MediaProber + Send + Sync + 'static,
{
    pub fn new(invoker: I, prober: P, options: BatchOptions) -> Self {
        let compiler = Arc::new(FilterGraphCompiler::new(
            options.sample_rate,
            options.channels,
        ));
        Self {
            invoker: Arc::new(invoker),
            prober: Arc::new(prober),
            compiler,
            options,
        }
    }

    /// Run every spec to completion, failure, or cancellation.
    ///
    /// Job-level problems surface as `Failed` events and count toward the
    /// summary; only environment problems (missing tool, unusable output
    /// directory) abort the whole batch.
    pub async fn run(
        &self,
        specs: Vec<TransformSpec>,
        events: mpsc::UnboundedSender<BatchEvent>,
        cancel: CancellationToken,
    ) -> Result<BatchSummary, BatchError> {
        self.invoker.preflight().await.map_err(BatchError::Preflight)?;
        tokio::fs::create_dir_all(&self.options.output_dir)
            .await
            .map_err(|source| BatchError::OutputDir {
                path: self.options.output_dir.display().to_string(),
                source,
            })?;

        let jobs: Vec<(Uuid, TransformSpec)> =
            specs.into_iter().map(|s| (Uuid::new_v4(), s)).collect();
        let mut summary = BatchSummary {
            total: jobs.len(),
            ..Default::default()
        };

        for (id, spec) in &jobs {
            send_update(&events, *id, &spec.input, JobState::Queued, 0.0, None);
        }
        info!(jobs = jobs.len(), workers = self.options.workers, "batch started");

        let semaphore = Arc::new(Semaphore::new(self.options.workers));
        let mut handles = Vec::with_capacity(jobs.len());

        for (id, spec) in jobs {
            let invoker = Arc::clone(&self.invoker);
            let prober = Arc::clone(&self.prober);
            let compiler = Arc::clone(&self.compiler);
            let semaphore = Arc::clone(&semaphore);
            let output_dir = self.options.output_dir.clone();
            let events = events.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                run_one(
                    &*invoker, &*prober, &compiler, &output_dir, semaphore, id, spec, events,
                    cancel,
                )
                .await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(JobEnd::Succeeded) => summary.succeeded += 1,
                Ok(JobEnd::Failed) => summary.failed += 1,
                Ok(JobEnd::Cancelled) => summary.cancelled += 1,
                Err(e) => {
                    warn!(error = %e, "job task panicked");
                    summary.failed += 1;
                }
            }
        }

        let _ = events.send(BatchEvent::BatchDone {
            succeeded: summary.succeeded,
            failed: summary.failed,
            cancelled: summary.cancelled,
        });
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        Ok(summary)
    }
}

/// Probe, compile, and name before waiting for a worker slot: a job with
/// bad parameters reports its failure right away instead of queueing
/// behind running work.
#[allow(clippy::too_many_arguments)]
async fn run_one<I: Invoker, P: MediaProber>(
    invoker: &I,
    prober: &P,
    compiler: &FilterGraphCompiler,
    output_dir: &std::path::Path,
    semaphore: Arc<Semaphore>,
    id: Uuid,
    spec: TransformSpec,
    events: mpsc::UnboundedSender<BatchEvent>,
    cancel: CancellationToken,
) -> JobEnd {
    if cancel.is_cancelled() {
        send_update(&events, id, &spec.input, JobState::Cancelled, 0.0, None);
        return JobEnd::Cancelled;
    }

    let source = match prober.probe(&spec.input).await {
        Ok(source) => source,
        Err(e) => return fail(&events, id, &spec.input, e.to_string()),
    };
    let graph = match compiler.compile(&spec, &source) {
        Ok(graph) => graph,
        Err(e) => return fail(&events, id, &spec.input, e.to_string()),
    };
    let output = match OutputNamer::new().derive(&spec, output_dir) {
        Ok(output) => output,
        Err(e) => return fail(&events, id, &spec.input, e.to_string()),
    };

    let _permit = tokio::select! {
        _ = cancel.cancelled() => {
            send_update(&events, id, &spec.input, JobState::Cancelled, 0.0, None);
            return JobEnd::Cancelled;
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            // the semaphore is never closed while jobs hold it
            Err(_) => {
                send_update(&events, id, &spec.input, JobState::Cancelled, 0.0, None);
                return JobEnd::Cancelled;
            }
        },
    };

    send_update(&events, id, &spec.input, JobState::Running, 0.0, None);
    let invocation = Invocation {
        graph,
        input: spec.input.clone(),
        output,
    };

    let progress_events = events.clone();
    let progress_input = spec.input.clone();
    let on_progress = move |percent: f64| {
        send_update(
            &progress_events,
            id,
            &progress_input,
            JobState::Running,
            percent,
            None,
        );
    };

    match invoker.execute(&invocation, &on_progress, &cancel).await {
        Ok(ExecOutcome::Completed) => {
            info!(input = %spec.input.display(), output = %invocation.output.display(), "job completed");
            send_update(&events, id, &spec.input, JobState::Completed, 100.0, None);
            JobEnd::Succeeded
        }
        Ok(ExecOutcome::Cancelled) => {
            remove_partial(&invocation.output).await;
            send_update(&events, id, &spec.input, JobState::Cancelled, 0.0, None);
            JobEnd::Cancelled
        }
        Err(e) => {
            remove_partial(&invocation.output).await;
            fail(&events, id, &spec.input, e.to_string())
        }
    }
}

/// Interrupted runs leave half-written outputs behind; drop them
async fn remove_partial(output: &std::path::Path) {
    if tokio::fs::try_exists(output).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(output).await {
            warn!(path = %output.display(), error = %e, "could not remove partial output");
        }
    }
}

fn fail(
    events: &mpsc::UnboundedSender<BatchEvent>,
    id: Uuid,
    input: &std::path::Path,
    message: String,
) -> JobEnd {
    warn!(input = %input.display(), %message, "job failed");
    send_update(events, id, input, JobState::Failed, 0.0, Some(message));
    JobEnd::Failed
}

fn send_update(
    events: &mpsc::UnboundedSender<BatchEvent>,
    id: Uuid,
    input: &std::path::Path,
    state: JobState,
    percent: f64,
    message: Option<String>,
) {
    let _ = events.send(BatchEvent::JobUpdate {
        id,
        input: input.to_path_buf(),
        state,
        percent,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, SourceInfo};
    use crate::spec::TransformKind;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Clone)]
    struct FakeProber;

    impl MediaProber for FakeProber {
        async fn probe(&self, path: &Path) -> Result<SourceInfo, ProbeError> {
            if path.to_string_lossy().contains("unreadable") {
                return Err(ProbeError::NoStreams(path.display().to_string()));
            }
            Ok(SourceInfo {
                duration_secs: Some(60.0),
                width: None,
                height: None,
                is_still_image: false,
                has_audio: true,
                has_video: false,
            })
        }
    }

    #[derive(Default)]
    struct FakeInvoker {
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail_inputs: HashSet<PathBuf>,
        /// Inputs that never finish on their own, only via cancellation
        hang_inputs: HashSet<PathBuf>,
    }

    impl Invoker for FakeInvoker {
        async fn preflight(&self) -> Result<(), InvokeError> {
            Ok(())
        }

        async fn execute(
            &self,
            invocation: &Invocation,
            on_progress: &(dyn Fn(f64) + Send + Sync),
            cancel: &CancellationToken,
        ) -> Result<ExecOutcome, InvokeError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let result = if self.hang_inputs.contains(&invocation.input) {
                cancel.cancelled().await;
                Ok(ExecOutcome::Cancelled)
            } else {
                on_progress(50.0);
                tokio::time::sleep(Duration::from_millis(10)).await;
                if self.fail_inputs.contains(&invocation.input) {
                    Err(InvokeError::Failed {
                        status: "exit status: 1".to_string(),
                        stderr_tail: "simulated failure".to_string(),
                    })
                } else {
                    on_progress(100.0);
                    Ok(ExecOutcome::Completed)
                }
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    struct FailingPreflight;

    impl Invoker for FailingPreflight {
        async fn preflight(&self) -> Result<(), InvokeError> {
            Err(InvokeError::ToolNotFound {
                path: "ffmpeg".to_string(),
                source: std::io::Error::other("not found"),
            })
        }

        async fn execute(
            &self,
            _invocation: &Invocation,
            _on_progress: &(dyn Fn(f64) + Send + Sync),
            _cancel: &CancellationToken,
        ) -> Result<ExecOutcome, InvokeError> {
            unreachable!("preflight failed, execute must not run")
        }
    }

    fn audio_spec(name: &str) -> TransformSpec {
        TransformSpec::new(
            PathBuf::from(format!("/media/{name}")),
            TransformKind::SpeedPitch {
                speed_percent: 20.0,
                pitch_semitones: 0.0,
                bitrate_label: "192k".to_string(),
            },
        )
        .unwrap()
    }

    fn options(output_dir: PathBuf, workers: usize) -> BatchOptions {
        BatchOptions {
            output_dir,
            workers,
            sample_rate: 44100,
            channels: 2,
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<BatchEvent>) -> Vec<BatchEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_all_jobs_complete() {
        let dir = tempdir().unwrap();
        let runner = BatchRunner::new(
            FakeInvoker::default(),
            FakeProber,
            options(dir.path().to_path_buf(), 2),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let specs = vec![audio_spec("a.mp3"), audio_spec("b.mp3"), audio_spec("c.mp3")];
        let summary = runner
            .run(specs, tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);

        let events = drain(rx).await;
        let completed = events
            .iter()
            .filter(|e| matches!(e, BatchEvent::JobUpdate { state: JobState::Completed, .. }))
            .count();
        assert_eq!(completed, 3);
        assert!(matches!(
            events.last(),
            Some(BatchEvent::BatchDone { succeeded: 3, failed: 0, cancelled: 0 })
        ));
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_workers() {
        let dir = tempdir().unwrap();
        let runner = BatchRunner::new(
            FakeInvoker::default(),
            FakeProber,
            options(dir.path().to_path_buf(), 2),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let specs: Vec<TransformSpec> = (0..8).map(|i| audio_spec(&format!("{i}.mp3"))).collect();
        runner
            .run(specs, tx, CancellationToken::new())
            .await
            .unwrap();
        assert!(runner.invoker.max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_other_jobs() {
        let dir = tempdir().unwrap();
        let invoker = FakeInvoker {
            fail_inputs: HashSet::from([PathBuf::from("/media/bad.mp3")]),
            ..Default::default()
        };
        let runner = BatchRunner::new(invoker, FakeProber, options(dir.path().to_path_buf(), 2));
        let (tx, rx) = mpsc::unbounded_channel();
        let specs = vec![
            audio_spec("good1.mp3"),
            audio_spec("bad.mp3"),
            audio_spec("good2.mp3"),
        ];
        let summary = runner
            .run(specs, tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);

        let events = drain(rx).await;
        let failed_inputs: Vec<&PathBuf> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::JobUpdate {
                    input,
                    state: JobState::Failed,
                    message,
                    ..
                } => {
                    assert!(message.as_deref().unwrap().contains("simulated failure"));
                    Some(input)
                }
                _ => None,
            })
            .collect();
        assert_eq!(failed_inputs, vec![&PathBuf::from("/media/bad.mp3")]);
    }

    #[tokio::test]
    async fn test_probe_failure_counts_as_failed_job() {
        let dir = tempdir().unwrap();
        let runner = BatchRunner::new(
            FakeInvoker::default(),
            FakeProber,
            options(dir.path().to_path_buf(), 2),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let specs = vec![audio_spec("unreadable.mp3"), audio_spec("ok.mp3")];
        let summary = runner
            .run(specs, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_cancellation_drains_queue() {
        let dir = tempdir().unwrap();
        let invoker = FakeInvoker {
            hang_inputs: HashSet::from([PathBuf::from("/media/slow.mp3")]),
            ..Default::default()
        };
        let runner = BatchRunner::new(invoker, FakeProber, options(dir.path().to_path_buf(), 1));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let specs = vec![
            audio_spec("slow.mp3"),
            audio_spec("queued1.mp3"),
            audio_spec("queued2.mp3"),
        ];
        let summary = runner.run(specs, tx, cancel).await.unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.cancelled, 3);
        assert_eq!(
            summary.succeeded + summary.failed + summary.cancelled,
            summary.total
        );

        let events = drain(rx).await;
        assert!(matches!(
            events.last(),
            Some(BatchEvent::BatchDone { cancelled: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_compile_error_reported_while_workers_busy() {
        let dir = tempdir().unwrap();
        let invoker = FakeInvoker {
            hang_inputs: HashSet::from([PathBuf::from("/media/slow.mp3")]),
            ..Default::default()
        };
        let runner = BatchRunner::new(invoker, FakeProber, options(dir.path().to_path_buf(), 1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let bad = TransformSpec::new(
            PathBuf::from("/media/bad.mp3"),
            TransformKind::SpeedPitch {
                speed_percent: 20.0,
                pitch_semitones: 0.0,
                bitrate_label: "999k".to_string(),
            },
        )
        .unwrap();

        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(vec![audio_spec("slow.mp3"), bad], tx, run_cancel)
                .await
        });

        // the invalid bitrate must fail while the only worker slot is
        // still held by the hanging job
        let failed_input = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = rx.recv().await {
                if let BatchEvent::JobUpdate {
                    input,
                    state: JobState::Failed,
                    ..
                } = event
                {
                    return input;
                }
            }
            panic!("event channel closed without a failure event");
        })
        .await
        .expect("failure event should arrive before cancellation");
        assert_eq!(failed_input, PathBuf::from("/media/bad.mp3"));

        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.succeeded, 0);
    }

    #[tokio::test]
    async fn test_preflight_failure_aborts_batch() {
        let dir = tempdir().unwrap();
        let runner = BatchRunner::new(
            FailingPreflight,
            FakeProber,
            options(dir.path().to_path_buf(), 2),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = runner
            .run(vec![audio_spec("a.mp3")], tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BatchError::Preflight(_))));
    }
}
