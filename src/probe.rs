//! Duration probe. Reads container metadata with ffprobe so the encoder never has to
//! start just to learn how long the source is.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::TranscodeError;
use crate::ffmpeg::discovery::resolve_ffprobe;
use crate::ffmpeg::path_to_string;
use crate::media::MediaSource;
use crate::settings::CompressSettings;

#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Source duration in seconds. Always finite and positive on success.
    async fn probe_duration(&self, source: &MediaSource) -> Result<f64, TranscodeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

fn parse_seconds(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

/// Extracts the duration from `ffprobe -of json` output.
///
/// Uses the container duration, falling back to the longest video stream when the
/// container does not report one (raw or fragmented streams).
pub fn parse_probe_duration(json: &str) -> Result<f64, TranscodeError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| TranscodeError::metadata(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let from_format = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_seconds);
    let from_streams = output
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .filter_map(|s| s.duration.as_deref().and_then(parse_seconds))
        .filter(|d| d.is_finite())
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));

    let duration = from_format
        .or(from_streams)
        .ok_or_else(|| TranscodeError::metadata("ffprobe reported no duration"))?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(TranscodeError::metadata(format!(
            "ffprobe reported an unusable duration: {}",
            duration
        )));
    }
    Ok(duration)
}

/// Probes with the `ffprobe` CLI. The source bytes go to a transient temp file that is
/// deleted when the probe returns, whether it succeeded or not.
#[derive(Debug, Clone, Default)]
pub struct FfprobeDurationProbe {
    ffprobe: Option<PathBuf>,
    ffmpeg_hint: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
}

impl FfprobeDurationProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &CompressSettings) -> Self {
        Self {
            ffprobe: settings.ffprobe_path.clone(),
            ffmpeg_hint: settings.ffmpeg_path.clone(),
            scratch_dir: settings.workspace_dir.clone(),
        }
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: Some(path.into()),
            ..Self::default()
        }
    }

    async fn run_ffprobe(&self, ffprobe: &Path, media: &Path) -> Result<f64, TranscodeError> {
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type,duration",
                "-of",
                "json",
            ])
            .arg(media)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::metadata(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::metadata(format!(
                "ffprobe failed: {}",
                stderr.trim()
            )));
        }
        let json = String::from_utf8(output.stdout)
            .map_err(|_| TranscodeError::metadata("ffprobe output was not valid UTF-8"))?;
        parse_probe_duration(&json)
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe_duration(&self, source: &MediaSource) -> Result<f64, TranscodeError> {
        let ffprobe = {
            let explicit = self.ffprobe.clone();
            let hint = self.ffmpeg_hint.clone();
            tokio::task::spawn_blocking(move || resolve_ffprobe(explicit.as_deref(), hint.as_deref()))
                .await
                .map_err(|e| TranscodeError::metadata(format!("ffprobe lookup failed: {}", e)))?
                .map_err(|e| TranscodeError::metadata(e.to_string()))?
        };

        let suffix = source.extension().map(|e| format!(".{e}")).unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("fit-vid-probe-").suffix(&suffix);
        let transient = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| TranscodeError::metadata(format!("Failed to create probe file: {}", e)))?;
        tokio::fs::write(transient.path(), source.bytes())
            .await
            .map_err(|e| TranscodeError::metadata(format!("Failed to write probe file: {}", e)))?;

        log::debug!(
            target: "fit_vid::probe",
            "Probing duration: source={}, transient={}",
            source.name(),
            path_to_string(transient.path())
        );
        let result = self.run_ffprobe(&ffprobe, transient.path()).await;
        drop(transient);

        match &result {
            Ok(d) => log::debug!(target: "fit_vid::probe", "Probed duration {:.3}s", d),
            Err(e) => log::warn!(target: "fit_vid::probe", "Duration probe failed: {}", e),
        }
        result
    }
}
