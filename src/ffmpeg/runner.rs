//! FFmpeg process spawning and progress parsing.
//!
//! Spawns FFmpeg as a child process, parses `-progress pipe:1` from stdout and the
//! `Duration:` banner from stderr, and forwards throttled progress to the caller.
//! The child is killed when the run is cancelled or the future is dropped.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::progress::ProgressParser;
use crate::engine::{EngineError, RunContext};

/// Minimum interval between progress emits.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Emits progress at most every [`PROGRESS_EMIT_INTERVAL`], on 1% steps, and on completion.
struct ProgressThrottle {
    last_emit: Instant,
    last_progress: f64,
}

impl ProgressThrottle {
    fn new() -> Self {
        Self {
            last_emit: Instant::now(),
            last_progress: 0.0,
        }
    }

    fn should_emit(&mut self, p: f64) -> bool {
        let now = Instant::now();
        let emit = now.duration_since(self.last_emit) >= PROGRESS_EMIT_INTERVAL
            || (p - self.last_progress).abs() >= 0.01
            || p >= 1.0;
        if emit {
            self.last_emit = now;
            self.last_progress = p;
        }
        emit
    }
}

fn spawn_reader<R>(
    reader: R,
    parser: Arc<Mutex<ProgressParser>>,
    stderr_tail: Option<Arc<Mutex<Vec<u8>>>>,
    ctx: RunContext,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut throttle = ProgressThrottle::new();
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        // Drain to EOF: FFmpeg dies of SIGPIPE if its output pipe closes early.
        loop {
            line_buf.clear();
            match stream_reader.read_until(b'\n', &mut line_buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!(
                        target: "fit_vid::ffmpeg::runner",
                        "Failed to read FFmpeg output: {}",
                        e
                    );
                    break;
                }
            }
            let decoded = String::from_utf8_lossy(&line_buf);
            let line = decoded.trim_end_matches(['\n', '\r']);
            if let Some(tail) = &stderr_tail {
                let mut guard = tail.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            }
            let progress = parser.lock().feed(line);
            if let Some(p) = progress
                && throttle.should_emit(p)
            {
                ctx.report(p);
            }
        }
    })
}

/// Runs FFmpeg in `cwd` and waits for it to exit.
///
/// Staged names in `args` are relative, so `cwd` must be the engine workspace.
pub async fn run_ffmpeg(
    ffmpeg: &Path,
    args: &[String],
    cwd: &Path,
    ctx: RunContext,
) -> Result<(), EngineError> {
    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "fit_vid::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| EngineError::failed(-1, format!("Failed to spawn FFmpeg: {}", e)))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill().await;
        return Err(EngineError::from("Failed to capture FFmpeg output streams"));
    };

    let parser = Arc::new(Mutex::new(ProgressParser::new(ctx.duration_hint)));
    let stderr_tail = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = spawn_reader(stdout, Arc::clone(&parser), None, ctx.clone());
    let stderr_task = spawn_reader(
        stderr,
        Arc::clone(&parser),
        Some(Arc::clone(&stderr_tail)),
        RunContext {
            progress: None,
            ..ctx.clone()
        },
    );

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = ctx.cancel.cancelled() => None,
    };

    let status = match exited {
        Some(status) => status?,
        None => {
            log::warn!(
                target: "fit_vid::ffmpeg::runner",
                "FFmpeg run cancelled, terminating process"
            );
            if let Err(e) = child.kill().await {
                log::warn!(
                    target: "fit_vid::ffmpeg::runner",
                    "Failed to kill FFmpeg: {}",
                    e
                );
            }
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            return Err(EngineError::Aborted);
        }
    };

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    if status.success() {
        log::info!(
            target: "fit_vid::ffmpeg::runner",
            "FFmpeg completed successfully"
        );
        return Ok(());
    }
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Aborted);
    }

    let stderr = String::from_utf8_lossy(&stderr_tail.lock()).into_owned();
    let code = status.code().unwrap_or(-1);
    let err_preview = stderr.lines().rev().take(3).collect::<Vec<_>>().join("; ");
    log::error!(
        target: "fit_vid::ffmpeg::runner",
        "FFmpeg failed (code={}): {}",
        code,
        err_preview
    );
    Err(EngineError::Failed { code, stderr })
}
