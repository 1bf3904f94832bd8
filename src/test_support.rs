//! In-memory engine and fixed probe for exercising the compressor without FFmpeg.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{EngineError, RunContext, TranscodeEngine};
use crate::error::TranscodeError;
use crate::media::MediaSource;
use crate::probe::DurationProbe;

/// What a [`RecordingEngine`] does when `run` is called.
#[derive(Debug, Clone)]
pub enum RunBehavior {
    /// Reports 25/50/100% and writes `output` to the last argument's name.
    Succeed { output: Vec<u8> },
    /// Like `Succeed`, but holds the run open for `delay` first.
    SucceedAfter { output: Vec<u8>, delay: Duration },
    Fail { code: i32, stderr: String },
    /// Never finishes on its own; resolves to `Aborted` once cancelled.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    Stage(String),
    Run(Vec<String>),
    Read(String),
    Delete(String),
}

impl EngineOp {
    pub fn name(&self) -> Option<&str> {
        match self {
            EngineOp::Stage(n) | EngineOp::Read(n) | EngineOp::Delete(n) => Some(n),
            EngineOp::Run(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct RecordingEngine {
    behavior: RunBehavior,
    fail_deletes: bool,
    staged: Mutex<HashMap<String, Vec<u8>>>,
    ops: Mutex<Vec<EngineOp>>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new(RunBehavior::Succeed {
            output: b"compressed".to_vec(),
        })
    }
}

impl RecordingEngine {
    pub fn new(behavior: RunBehavior) -> Self {
        Self {
            behavior,
            fail_deletes: false,
            staged: Mutex::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
        }
    }

    /// Makes every `delete_staged` fail and leave the entry in place.
    pub fn with_failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn ops(&self) -> Vec<EngineOp> {
        self.ops.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.ops
            .lock()
            .iter()
            .filter(|op| matches!(op, EngineOp::Run(_)))
            .count()
    }

    /// Names currently held in the workspace.
    pub fn staged_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.staged.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn record(&self, op: EngineOp) {
        self.ops.lock().push(op);
    }

    fn write_output(&self, args: &[String], output: &[u8]) {
        if let Some(name) = args.last() {
            self.staged.lock().insert(name.clone(), output.to_vec());
        }
    }
}

#[async_trait]
impl TranscodeEngine for RecordingEngine {
    fn stage_input(&self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        self.record(EngineOp::Stage(name.to_string()));
        self.staged.lock().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn run(&self, args: &[String], ctx: RunContext) -> Result<(), EngineError> {
        self.record(EngineOp::Run(args.to_vec()));
        match &self.behavior {
            RunBehavior::Succeed { output } => {
                for p in [0.25, 0.5, 1.0] {
                    ctx.report(p);
                }
                self.write_output(args, output);
                Ok(())
            }
            RunBehavior::SucceedAfter { output, delay } => {
                ctx.report(0.25);
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = ctx.cancel.cancelled() => return Err(EngineError::Aborted),
                }
                ctx.report(1.0);
                self.write_output(args, output);
                Ok(())
            }
            RunBehavior::Fail { code, stderr } => {
                ctx.report(0.1);
                Err(EngineError::failed(*code, stderr.clone()))
            }
            RunBehavior::Hang => {
                ctx.report(0.05);
                ctx.cancel.cancelled().await;
                Err(EngineError::Aborted)
            }
        }
    }

    fn read_output(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.record(EngineOp::Read(name.to_string()));
        self.staged
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::from(format!("No staged output named {}", name)))
    }

    fn delete_staged(&self, name: &str) -> Result<(), EngineError> {
        self.record(EngineOp::Delete(name.to_string()));
        if self.fail_deletes {
            return Err(EngineError::Internal(format!(
                "Permission denied removing {}",
                name
            )));
        }
        self.staged.lock().remove(name);
        Ok(())
    }
}

/// Probe that returns a fixed result and counts calls.
#[derive(Debug)]
pub struct FixedDurationProbe {
    result: Result<f64, String>,
    calls: Mutex<usize>,
}

impl FixedDurationProbe {
    pub fn seconds(duration: f64) -> Self {
        Self {
            result: Ok(duration),
            calls: Mutex::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl DurationProbe for FixedDurationProbe {
    async fn probe_duration(&self, _source: &MediaSource) -> Result<f64, TranscodeError> {
        *self.calls.lock() += 1;
        self.result.clone().map_err(TranscodeError::Metadata)
    }
}
