//! Adapter seam for the external transcode engine.
//!
//! The engine owns a workspace of named byte buffers. Callers stage an input,
//! run the engine with an argument list that refers to staged names, read the
//! output back, and delete both names. The engine is not re-entrant; callers
//! serialize access through [`crate::session::EngineSession`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Receives normalized engine progress in [0,1].
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unsupported(String),

    /// FFmpeg exited unsuccessfully, or could not be started (`code` -1).
    #[error("FFmpeg failed (code {code}): {stderr}")]
    Failed { code: i32, stderr: String },

    /// Workspace or bookkeeping failure that never reached an FFmpeg exit status.
    #[error("{0}")]
    Internal(String),

    #[error("Aborted")]
    Aborted,
}

impl EngineError {
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::Failed {
            code,
            stderr: stderr.into(),
        }
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            EngineError::Aborted
        } else {
            EngineError::Internal(s)
        }
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

/// Per-run hooks handed to [`TranscodeEngine::run`].
#[derive(Clone, Default)]
pub struct RunContext {
    pub progress: Option<ProgressCallback>,
    /// Known source duration; lets the engine report progress before it parses one itself.
    pub duration_hint: Option<f64>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn report(&self, fraction: f64) {
        if let Some(cb) = &self.progress {
            cb(fraction);
        }
    }
}

#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Writes `bytes` into the workspace under `name`, replacing any previous entry.
    fn stage_input(&self, name: &str, bytes: &[u8]) -> Result<(), EngineError>;

    /// Runs one decode/encode. Resolves to `Err(EngineError::Aborted)` when
    /// `ctx.cancel` fires before the engine finishes.
    async fn run(&self, args: &[String], ctx: RunContext) -> Result<(), EngineError>;

    fn read_output(&self, name: &str) -> Result<Vec<u8>, EngineError>;

    /// Removes `name` from the workspace. Deleting an absent name is not an error.
    fn delete_staged(&self, name: &str) -> Result<(), EngineError>;
}
