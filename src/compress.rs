//! Compress-to-size entry point.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::{RunContext, TranscodeEngine};
use crate::error::TranscodeError;
use crate::ffmpeg::{FfmpegEngine, build_compress_args};
use crate::media::{CompressedMedia, MediaSource};
use crate::plan::EncodingPlan;
use crate::probe::{DurationProbe, FfprobeDurationProbe};
use crate::session::{EngineJob, EngineSession, ProgressSink, StagedNames};
use crate::settings::CompressSettings;

/// One compress call. Immutable once built.
pub struct TranscodeRequest {
    pub source: MediaSource,
    pub target_size_bytes: u64,
    pub progress: Option<ProgressSink>,
    pub cancel: CancellationToken,
}

impl TranscodeRequest {
    pub fn new(source: MediaSource, target_size_bytes: u64) -> Self {
        Self {
            source,
            target_size_bytes,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// `on_progress` receives percentages in [0,100], non-decreasing within this call.
    pub fn with_progress(mut self, on_progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(on_progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

pub struct Compressor<E, P = FfprobeDurationProbe> {
    session: EngineSession<E>,
    probe: P,
    settings: CompressSettings,
}

impl Compressor<FfmpegEngine, FfprobeDurationProbe> {
    /// FFmpeg-backed compressor. FFmpeg is located and checked on the first call.
    pub fn ffmpeg(settings: CompressSettings) -> Self {
        let loader_settings = settings.clone();
        Self {
            session: EngineSession::new(move || FfmpegEngine::load(&loader_settings)),
            probe: FfprobeDurationProbe::from_settings(&settings),
            settings,
        }
    }
}

impl<E, P> Compressor<E, P>
where
    E: TranscodeEngine + 'static,
    P: DurationProbe,
{
    pub fn new(session: EngineSession<E>, probe: P, settings: CompressSettings) -> Self {
        Self {
            session,
            probe,
            settings,
        }
    }

    pub fn session(&self) -> &EngineSession<E> {
        &self.session
    }

    pub fn settings(&self) -> &CompressSettings {
        &self.settings
    }

    /// Measures the source duration with the probe, never the engine.
    pub async fn probe_duration(&self, source: &MediaSource) -> Result<f64, TranscodeError> {
        self.probe.probe_duration(source).await
    }

    /// Re-encodes `request.source` to H.264/AAC sized to fit `request.target_size_bytes`.
    ///
    /// All-or-nothing: either the complete output or one typed error. Staged engine
    /// entries are gone by the time this returns, whatever the outcome.
    pub async fn compress_to_size(
        &self,
        request: TranscodeRequest,
    ) -> Result<CompressedMedia, TranscodeError> {
        let TranscodeRequest {
            source,
            target_size_bytes,
            progress,
            cancel,
        } = request;

        if target_size_bytes == 0 {
            return Err(TranscodeError::invalid_request(
                "target size must be greater than zero",
            ));
        }
        if source.is_empty() {
            return Err(TranscodeError::invalid_request(format!(
                "source {:?} is empty",
                source.name()
            )));
        }

        log::info!(
            target: "fit_vid::compress",
            "Compressing {} ({} bytes) to at most {} bytes",
            source.name(),
            source.len(),
            target_size_bytes
        );

        let duration = tokio::select! {
            result = self.probe.probe_duration(&source) => result?,
            _ = cancel.cancelled() => return Err(TranscodeError::Aborted),
        };
        let plan = EncodingPlan::for_target(duration, target_size_bytes)?;
        log::info!(
            target: "fit_vid::compress",
            "Plan: duration={:.3}s, video={} bps, maxrate={} bps, bufsize={} bps, audio={} bps",
            plan.duration_seconds,
            plan.video_bitrate_bps,
            plan.max_rate_bps,
            plan.buffer_size_bps,
            plan.audio_bitrate_bps
        );

        let settings = &self.settings;
        let build_args = move |names: &StagedNames| {
            build_compress_args(&names.input, &names.output, &plan, settings)
        };
        let extension = source.extension();
        let bytes = self
            .session
            .run_job(EngineJob {
                input: source.bytes(),
                input_extension: extension.as_deref(),
                build_args: &build_args,
                progress,
                ctx: RunContext {
                    progress: None,
                    duration_hint: Some(plan.duration_seconds),
                    cancel,
                },
            })
            .await
            .inspect_err(|e| {
                log::warn!(target: "fit_vid::compress", "Compression of {} failed: {}", source.name(), e)
            })?;

        if bytes.is_empty() {
            return Err(TranscodeError::encode("engine produced an empty output"));
        }
        if bytes.len() as u64 > target_size_bytes {
            log::warn!(
                target: "fit_vid::compress",
                "Output of {} bytes exceeds the {} byte target",
                bytes.len(),
                target_size_bytes
            );
        }

        let media = CompressedMedia::new(source.name(), bytes);
        log::info!(
            target: "fit_vid::compress",
            "Compressed {} -> {} ({} bytes)",
            source.name(),
            media.file_name,
            media.size()
        );
        Ok(media)
    }
}
