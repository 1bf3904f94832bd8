use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fit_vid_core::ffmpeg::{FfmpegEngine, cleanup_stale_workspaces};
use fit_vid_core::media::compressed_file_name;
use fit_vid_core::{
    CompressSettings, Compressor, EncodingPlan, ErrorPayload, MediaSource, TranscodeError,
    TranscodeRequest, needs_compression,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

const STARTUP_CLEANUP_MAX_AGE_HOURS: u64 = 24;
/// Must stay well under the startup cleanup age.
const WORKSPACE_HEARTBEAT: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: ErrorPayload,
}

fn protocol_error(summary: &str, detail: impl Into<String>) -> ErrorPayload {
    ErrorPayload {
        kind: "invalidRequest",
        summary: summary.to_string(),
        detail: detail.into(),
    }
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Clone)]
struct ActiveJob {
    job_id: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct JobState {
    active_job: Arc<Mutex<Option<ActiveJob>>>,
    next_job_id: Arc<AtomicU64>,
}

impl JobState {
    fn new() -> Self {
        Self {
            active_job: Arc::new(Mutex::new(None)),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self) -> Result<ActiveJob, TranscodeError> {
        let mut guard = self.active_job.lock();
        if let Some(existing) = guard.as_ref() {
            return Err(TranscodeError::invalid_request(format!(
                "Another job is already running (jobId={})",
                existing.job_id
            )));
        }
        let job = ActiveJob {
            job_id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        };
        *guard = Some(job.clone());
        Ok(job)
    }

    fn finish_job(&self, job_id: u64) {
        let mut guard = self.active_job.lock();
        if guard.as_ref().is_some_and(|active| active.job_id == job_id) {
            *guard = None;
        }
    }

    fn current_job(&self) -> Option<ActiveJob> {
        self.active_job.lock().clone()
    }
}

struct ActiveJobGuard {
    state: JobState,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeedsCompressionParams {
    size_bytes: u64,
    max_size_mb: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectParams {
    input_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanParams {
    duration_seconds: f64,
    target_size_bytes: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompressParams {
    input_path: PathBuf,
    output_path: Option<PathBuf>,
    target_size_bytes: u64,
    settings: Option<CompressSettings>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CancelParams {
    job_id: Option<u64>,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;
type SharedCompressor = Arc<Compressor<FfmpegEngine>>;

/// One compressor per distinct settings value, so each keeps its engine and workspace
/// across calls.
struct CompressorCache {
    defaults: CompressSettings,
    compressors: Mutex<HashMap<CompressSettings, SharedCompressor>>,
}

impl CompressorCache {
    fn new(defaults: CompressSettings) -> Self {
        Self {
            defaults,
            compressors: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, settings: Option<CompressSettings>) -> SharedCompressor {
        let settings = settings.unwrap_or_else(|| self.defaults.clone());
        let mut compressors = self.compressors.lock();
        let compressor = compressors.entry(settings).or_insert_with_key(|settings| {
            log::debug!(target: "fit_vid::sidecar", "New compressor for {:?}", settings);
            Arc::new(Compressor::ffmpeg(settings.clone()))
        });
        Arc::clone(compressor)
    }

    /// Refreshes the activity marker of every initialized engine workspace.
    fn touch_workspaces(&self) {
        let compressors: Vec<SharedCompressor> = self.compressors.lock().values().cloned().collect();
        for compressor in compressors {
            if let Some(engine) = compressor.session().engine()
                && let Err(e) = engine.workspace().touch()
            {
                log::warn!(
                    target: "fit_vid::sidecar",
                    "Failed to refresh workspace {}: {}",
                    engine.workspace().path().display(),
                    e
                );
            }
        }
    }
}

struct Sidecar {
    writer: SharedWriter,
    jobs: JobState,
    compressors: Arc<CompressorCache>,
}

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) {
    let mut guard = writer.lock();
    if let Err(e) = write_json_line(&mut *guard, value) {
        log::error!(target: "fit_vid::sidecar", "Failed to write to stdout: {}", e);
    }
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    write_json_line_shared(writer, &message);
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, ErrorPayload>) {
    match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(error) => write_json_line_shared(writer, &RpcFailure { id, error }),
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ErrorPayload> {
    serde_json::from_value(params)
        .map_err(|e| protocol_error("Invalid params payload", e.to_string()))
}

fn to_result_value<T: serde::Serialize>(value: &T) -> Result<Value, ErrorPayload> {
    serde_json::to_value(value)
        .map_err(|e| protocol_error("Serialization error", e.to_string()))
}

/// Output path for a compress job: the requested one, else the compressed name next to the input.
fn resolve_output_path(input_path: &Path, output_path: Option<PathBuf>) -> PathBuf {
    output_path.unwrap_or_else(|| {
        let name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        input_path.with_file_name(compressed_file_name(&name))
    })
}

impl Sidecar {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, ErrorPayload> {
        match method {
            "media.needsCompression" => {
                let parsed: NeedsCompressionParams = params_from_value(params)?;
                Ok(json!({
                    "needsCompression": needs_compression(parsed.size_bytes, parsed.max_size_mb)
                }))
            }
            "media.inspect" => {
                let parsed: InspectParams = params_from_value(params)?;
                let source = MediaSource::from_path(&parsed.input_path)
                    .await
                    .map_err(|e| ErrorPayload::from(&e))?;
                let duration = self
                    .compressors
                    .get(None)
                    .probe_duration(&source)
                    .await
                    .map_err(|e| ErrorPayload::from(&e))?;
                Ok(json!({ "durationSeconds": duration }))
            }
            "media.plan" => {
                let parsed: PlanParams = params_from_value(params)?;
                let plan = EncodingPlan::for_target(parsed.duration_seconds, parsed.target_size_bytes)
                    .map_err(|e| ErrorPayload::from(&e))?;
                to_result_value(&plan)
            }
            "media.cancel" => {
                let parsed: CancelParams = params_from_value(params)?;
                match (self.jobs.current_job(), parsed.job_id) {
                    (None, Some(job_id)) => Err(protocol_error(
                        "Unknown jobId",
                        format!("Unknown jobId: {}", job_id),
                    )),
                    (None, None) => Ok(json!({ "cancelled": false, "jobId": Value::Null })),
                    (Some(active), Some(job_id)) if active.job_id != job_id => Err(
                        protocol_error("Unknown jobId", format!("Unknown jobId: {}", job_id)),
                    ),
                    (Some(active), _) => {
                        log::info!(target: "fit_vid::sidecar", "Cancelling job {}", active.job_id);
                        active.cancel.cancel();
                        Ok(json!({ "cancelled": true, "jobId": active.job_id }))
                    }
                }
            }
            _ => Err(protocol_error(
                "Unknown method",
                format!("Unknown method: {}", method),
            )),
        }
    }

    fn start_compress(&self, request: RpcRequest) {
        let parsed: CompressParams = match params_from_value(request.params) {
            Ok(parsed) => parsed,
            Err(payload) => return respond(&self.writer, request.id, Err(payload)),
        };
        let job = match self.jobs.begin_job() {
            Ok(job) => job,
            Err(err) => return respond(&self.writer, request.id, Err(ErrorPayload::from(&err))),
        };
        let compressor = self.compressors.get(parsed.settings.clone());
        let writer = Arc::clone(&self.writer);
        let guard = ActiveJobGuard {
            state: self.jobs.clone(),
            job_id: job.job_id,
        };

        tokio::spawn(async move {
            let _guard = guard;
            let job_id = job.job_id;
            let result = run_compress(parsed, job, &compressor, &writer).await;
            match result {
                Ok(value) => {
                    emit_rpc_event(&writer, "media.job.complete", json!({ "jobId": job_id }));
                    respond(&writer, request.id, Ok(value));
                }
                Err(err) => {
                    let payload = ErrorPayload::from(&err);
                    emit_rpc_event(
                        &writer,
                        "media.job.error",
                        json!({
                            "jobId": job_id,
                            "kind": payload.kind,
                            "summary": payload.summary,
                            "detail": payload.detail,
                        }),
                    );
                    respond(&writer, request.id, Err(payload));
                }
            }
        });
    }
}

async fn run_compress(
    params: CompressParams,
    job: ActiveJob,
    compressor: &SharedCompressor,
    writer: &SharedWriter,
) -> Result<Value, TranscodeError> {
    let source = MediaSource::from_path(&params.input_path).await?;
    let output_path = resolve_output_path(&params.input_path, params.output_path);

    let events = Arc::clone(writer);
    let job_id = job.job_id;
    let request = TranscodeRequest::new(source, params.target_size_bytes)
        .with_cancel(job.cancel)
        .with_progress(move |percent| {
            emit_rpc_event(
                &events,
                "media.job.progress",
                json!({ "jobId": job_id, "progress": percent }),
            )
        });
    let media = compressor.compress_to_size(request).await?;
    media.write_to(&output_path).await.map_err(|e| {
        TranscodeError::encode(format!(
            "Failed to write {}: {}",
            output_path.display(),
            e
        ))
    })?;

    Ok(json!({
        "jobId": job_id,
        "outputPath": output_path,
        "fileName": media.file_name,
        "mimeType": media.mime_type,
        "sizeBytes": media.size(),
    }))
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let settings = CompressSettings::default();
    let cleanup_parent = settings.workspace_dir.clone().unwrap_or_else(std::env::temp_dir);
    tokio::task::spawn_blocking(move || {
        cleanup_stale_workspaces(
            &cleanup_parent,
            Duration::from_secs(STARTUP_CLEANUP_MAX_AGE_HOURS * 3600),
        )
    })
    .await
    .map_err(io::Error::other)?;

    let sidecar = Sidecar {
        writer: Arc::new(Mutex::new(io::stdout())),
        jobs: JobState::new(),
        compressors: Arc::new(CompressorCache::new(settings)),
    };

    let heartbeat = Arc::clone(&sidecar.compressors);
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(WORKSPACE_HEARTBEAT);
        loop {
            ticks.tick().await;
            heartbeat.touch_workspaces();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: protocol_error("Invalid input stream", err.to_string()),
                };
                write_json_line_shared(&sidecar.writer, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: protocol_error("Invalid request", err.to_string()),
                };
                write_json_line_shared(&sidecar.writer, &failure);
                continue;
            }
        };

        if request.method == "media.compress" {
            sidecar.start_compress(request);
        } else {
            let result = sidecar.dispatch(&request.method, request.params).await;
            respond(&sidecar.writer, request.id, result);
        }
    }

    // stdin closed: stop the active job and let its task release the workspace.
    if let Some(active) = sidecar.jobs.current_job() {
        active.cancel.cancel();
    }
    while sidecar.jobs.current_job().is_some() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}
