//! Shared engine handle.
//!
//! A session owns one lazily-initialized engine and a FIFO lock. Every workspace
//! operation of a call (stage, run, read, delete) happens while that call holds the
//! lock, so one call's staged names are never touched by another call. Staged names
//! are request-scoped and deleted by a drop guard on every exit path, including
//! cancellation and a dropped future.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::engine::{EngineError, ProgressCallback, RunContext, TranscodeEngine};
use crate::error::TranscodeError;
use crate::ffmpeg::format_args_for_display_multiline;
use crate::media::OUTPUT_EXTENSION;

/// Receives overall progress as a percentage in [0,100].
pub type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

type EngineLoader<E> = Arc<dyn Fn() -> Result<E, EngineError> + Send + Sync>;

/// Workspace names for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedNames {
    pub input: String,
    pub output: String,
}

/// Deletes both staged names when dropped. Failures are logged and never replace
/// the call's own result.
struct StagedGuard<'a, E: TranscodeEngine> {
    engine: &'a E,
    names: &'a StagedNames,
}

impl<E: TranscodeEngine> Drop for StagedGuard<'_, E> {
    fn drop(&mut self) {
        for name in [&self.names.input, &self.names.output] {
            if let Err(e) = self.engine.delete_staged(name) {
                log::warn!(
                    target: "fit_vid::session",
                    "Failed to delete staged entry {}: {}",
                    name,
                    e
                );
            }
        }
        log::debug!(
            target: "fit_vid::session",
            "Released staged entries {} and {}",
            self.names.input,
            self.names.output
        );
    }
}

/// Maps engine fractions to percentages and drops values below the last one delivered.
fn percent_forwarder(sink: ProgressSink) -> ProgressCallback {
    let last = Mutex::new(f64::NEG_INFINITY);
    Arc::new(move |fraction: f64| {
        if !fraction.is_finite() {
            return;
        }
        let percent = (fraction * 100.0).clamp(0.0, 100.0);
        {
            let mut guard = last.lock();
            if percent < *guard {
                return;
            }
            *guard = percent;
        }
        sink(percent);
    })
}

/// Inputs for one serialized engine run.
pub struct EngineJob<'a> {
    pub input: &'a [u8],
    pub input_extension: Option<&'a str>,
    pub build_args: &'a (dyn Fn(&StagedNames) -> Vec<String> + Send + Sync),
    pub progress: Option<ProgressSink>,
    pub ctx: RunContext,
}

pub struct EngineSession<E> {
    engine: OnceCell<E>,
    loader: Option<EngineLoader<E>>,
    queue: tokio::sync::Mutex<()>,
    next_request_id: AtomicU64,
}

impl<E: TranscodeEngine + 'static> EngineSession<E> {
    /// Creates a session whose engine is built by `loader` on first use.
    /// The loader runs on the blocking pool.
    pub fn new(loader: impl Fn() -> Result<E, EngineError> + Send + Sync + 'static) -> Self {
        Self {
            engine: OnceCell::new(),
            loader: Some(Arc::new(loader)),
            queue: tokio::sync::Mutex::new(()),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Creates a session around an already-initialized engine.
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine: OnceCell::from(engine),
            loader: None,
            queue: tokio::sync::Mutex::new(()),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.initialized()
    }

    /// The engine, if it has been initialized.
    pub fn engine(&self) -> Option<&E> {
        self.engine.get()
    }

    async fn ensure_engine(&self) -> Result<&E, EngineError> {
        self.engine
            .get_or_try_init(|| async {
                let loader = self
                    .loader
                    .clone()
                    .ok_or_else(|| EngineError::from("Engine session has no loader"))?;
                log::info!(target: "fit_vid::session", "Initializing transcode engine");
                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| EngineError::from(format!("Engine initialization failed: {}", e)))?
            })
            .await
    }

    /// Allocates names unique to this session: `input-<millis>-<id>.<ext>` and
    /// `output-<millis>-<id>.mp4`.
    pub fn allocate_names(&self, input_extension: Option<&str>) -> StagedNames {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        StagedNames {
            input: format!("input-{}-{}.{}", millis, id, input_extension.unwrap_or("bin")),
            output: format!("output-{}-{}.{}", millis, id, OUTPUT_EXTENSION),
        }
    }

    /// Stages the input, runs the engine and reads the output back, all under the
    /// session lock. Calls queue in arrival order; a call cancelled while queued
    /// leaves the queue at once.
    pub async fn run_job(&self, job: EngineJob<'_>) -> Result<Vec<u8>, TranscodeError> {
        let cancel = job.ctx.cancel.clone();
        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranscodeError::Aborted),
            turn = self.queue.lock() => turn,
        };
        let engine = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranscodeError::Aborted),
            engine = self.ensure_engine() => engine?,
        };

        let names = self.allocate_names(job.input_extension);
        let _staged = StagedGuard {
            engine,
            names: &names,
        };

        engine.stage_input(&names.input, job.input)?;
        let args = (job.build_args)(&names);
        log::debug!(
            target: "fit_vid::session",
            "Running engine:\nffmpeg\n{}",
            format_args_for_display_multiline(&args)
        );

        let ctx = RunContext {
            progress: job.progress.map(percent_forwarder),
            ..job.ctx
        };
        engine.run(&args, ctx).await?;
        Ok(engine.read_output(&names.output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EngineOp, RecordingEngine, RunBehavior};

    fn job<'a>(
        input: &'a [u8],
        build: &'a (dyn Fn(&StagedNames) -> Vec<String> + Send + Sync),
    ) -> EngineJob<'a> {
        EngineJob {
            input,
            input_extension: Some("mov"),
            build_args: build,
            progress: None,
            ctx: RunContext::default(),
        }
    }

    fn passthrough(names: &StagedNames) -> Vec<String> {
        vec!["-i".into(), names.input.clone(), names.output.clone()]
    }

    #[test]
    fn names_are_request_scoped() {
        let session = EngineSession::with_engine(RecordingEngine::default());
        let a = session.allocate_names(Some("mov"));
        let b = session.allocate_names(Some("mov"));
        assert_ne!(a.input, b.input);
        assert_ne!(a.output, b.output);
        assert!(a.input.starts_with("input-") && a.input.ends_with(".mov"));
        assert!(a.output.starts_with("output-") && a.output.ends_with(".mp4"));
        assert!(session.allocate_names(None).input.ends_with(".bin"));
    }

    #[tokio::test]
    async fn success_reads_output_and_cleans_up() {
        let session = EngineSession::with_engine(RecordingEngine::new(RunBehavior::Succeed {
            output: b"encoded".to_vec(),
        }));
        let out = session.run_job(job(b"src", &passthrough)).await.unwrap();
        assert_eq!(out, b"encoded");
        let engine = session.engine().unwrap();
        assert!(engine.staged_names().is_empty());
        let ops = engine.ops();
        assert!(matches!(ops.first(), Some(EngineOp::Stage(_))));
        assert_eq!(ops.iter().filter(|o| matches!(o, EngineOp::Delete(_))).count(), 2);
    }

    #[tokio::test]
    async fn failure_still_cleans_up() {
        let session = EngineSession::with_engine(RecordingEngine::new(RunBehavior::Fail {
            code: 1,
            stderr: "Conversion failed!".into(),
        }));
        let err = session.run_job(job(b"src", &passthrough)).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Encode { code: Some(1), .. }));
        assert!(session.engine().unwrap().staged_names().is_empty());
    }

    #[tokio::test]
    async fn dropped_future_still_cleans_up() {
        let session = EngineSession::with_engine(RecordingEngine::new(RunBehavior::Hang));
        let res = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            session.run_job(job(b"src", &passthrough)),
        )
        .await;
        assert!(res.is_err());
        let engine = session.engine().unwrap();
        assert!(engine.ops().iter().any(|o| matches!(o, EngineOp::Stage(_))));
        assert!(engine.staged_names().is_empty());
    }

    #[tokio::test]
    async fn delete_failure_does_not_replace_output() {
        let engine = RecordingEngine::new(RunBehavior::Succeed {
            output: b"encoded".to_vec(),
        })
        .with_failing_deletes();
        let session = EngineSession::with_engine(engine);
        let out = session.run_job(job(b"src", &passthrough)).await.unwrap();
        assert_eq!(out, b"encoded");
        let deletes = session
            .engine()
            .unwrap()
            .ops()
            .into_iter()
            .filter(|o| matches!(o, EngineOp::Delete(_)))
            .count();
        assert_eq!(deletes, 2);
    }

    #[tokio::test]
    async fn delete_failure_does_not_mask_encode_error() {
        let engine = RecordingEngine::new(RunBehavior::Fail {
            code: 1,
            stderr: "Conversion failed!".into(),
        })
        .with_failing_deletes();
        let session = EngineSession::with_engine(engine);
        let err = session.run_job(job(b"src", &passthrough)).await.unwrap_err();
        match err {
            TranscodeError::Encode { code, diagnostic } => {
                assert_eq!(code, Some(1));
                assert_eq!(diagnostic, "Conversion failed!");
            }
            other => panic!("expected Encode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_failure_does_not_mask_abort() {
        let session =
            EngineSession::with_engine(RecordingEngine::new(RunBehavior::Hang).with_failing_deletes());
        let j = job(b"src", &passthrough);
        let cancel = j.ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            cancel.cancel();
        });
        let err = session.run_job(j).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Aborted));
    }

    #[tokio::test]
    async fn cancel_while_queued_returns_promptly() {
        let session = Arc::new(EngineSession::with_engine(RecordingEngine::new(
            RunBehavior::SucceedAfter {
                output: b"encoded".to_vec(),
                delay: std::time::Duration::from_secs(5),
            },
        )));

        let first_ctx = RunContext::default();
        let first_cancel = first_ctx.cancel.clone();
        let holder = Arc::clone(&session);
        let first = tokio::spawn(async move {
            let build = passthrough;
            holder
                .run_job(EngineJob {
                    input: b"a",
                    input_extension: Some("mov"),
                    build_args: &build,
                    progress: None,
                    ctx: first_ctx,
                })
                .await
        });
        while session.engine().unwrap().run_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let queued = job(b"b", &passthrough);
        let cancel = queued.ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            cancel.cancel();
        });
        let err = tokio::time::timeout(std::time::Duration::from_secs(1), session.run_job(queued))
            .await
            .expect("queued call should leave the queue on cancel")
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Aborted));
        assert_eq!(session.engine().unwrap().run_count(), 1);

        first_cancel.cancel();
        assert!(matches!(first.await.unwrap(), Err(TranscodeError::Aborted)));
    }

    #[tokio::test]
    async fn lazy_loader_runs_once() {
        let loads = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&loads);
        let session = EngineSession::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(RecordingEngine::default())
        });
        assert!(!session.is_initialized());
        session.run_job(job(b"a", &passthrough)).await.unwrap();
        session.run_job(job(b"b", &passthrough)).await.unwrap();
        assert!(session.is_initialized());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_failure_is_encode_error() {
        let session: EngineSession<RecordingEngine> =
            EngineSession::new(|| Err(EngineError::NotFound("FFmpeg not found".into())));
        let err = session.run_job(job(b"a", &passthrough)).await.unwrap_err();
        match err {
            TranscodeError::Encode { diagnostic, .. } => assert_eq!(diagnostic, "FFmpeg not found"),
            other => panic!("expected Encode, got {other:?}"),
        }
        assert!(!session.is_initialized());
    }

    #[test]
    fn forwarder_scales_and_drops_regressions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let forward = percent_forwarder(Arc::new(move |p| sink_seen.lock().push(p)));
        forward(0.1);
        forward(0.5);
        forward(0.4);
        forward(f64::NAN);
        forward(1.5);
        assert_eq!(*seen.lock(), vec![10.0, 50.0, 100.0]);
    }
}
