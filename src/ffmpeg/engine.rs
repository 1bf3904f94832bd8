//! [`TranscodeEngine`] backed by the FFmpeg CLI and an on-disk workspace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::builder::{AUDIO_CODEC, VIDEO_CODEC};
use super::discovery::{get_available_encoders, resolve_ffmpeg};
use super::runner::run_ffmpeg;
use super::workspace::Workspace;
use crate::engine::{EngineError, RunContext, TranscodeEngine};
use crate::settings::CompressSettings;

const REQUIRED_ENCODERS: &[&str] = &[VIDEO_CODEC, AUDIO_CODEC];

#[derive(Debug)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    workspace: Workspace,
}

impl FfmpegEngine {
    /// Resolves FFmpeg, checks that it can encode H.264/AAC, and creates the workspace.
    /// Blocking; run it off the async runtime.
    pub fn load(settings: &CompressSettings) -> Result<Self, EngineError> {
        let ffmpeg = resolve_ffmpeg(settings.ffmpeg_path.as_deref())?;
        let encoders = get_available_encoders(&ffmpeg)?;
        let missing: Vec<&str> = REQUIRED_ENCODERS
            .iter()
            .copied()
            .filter(|required| !encoders.iter().any(|e| e == required))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::Unsupported(format!(
                "FFmpeg at {} is missing required encoders: {}",
                ffmpeg.display(),
                missing.join(", ")
            )));
        }
        Self::with_binary(ffmpeg, settings.workspace_dir.as_deref())
    }

    /// Skips encoder discovery. Used when the caller already vetted the binary.
    pub fn with_binary(ffmpeg: PathBuf, workspace_parent: Option<&Path>) -> Result<Self, EngineError> {
        let workspace = Workspace::create(workspace_parent)?;
        log::info!(
            target: "fit_vid::ffmpeg::engine",
            "FFmpeg engine ready: binary={}, workspace={}",
            ffmpeg.display(),
            workspace.path().display()
        );
        Ok(Self { ffmpeg, workspace })
    }

    pub fn binary(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn stage_input(&self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        if let Err(e) = self.workspace.touch() {
            log::warn!(
                target: "fit_vid::ffmpeg::engine",
                "Failed to refresh workspace marker: {}",
                e
            );
        }
        self.workspace.write(name, bytes)
    }

    async fn run(&self, args: &[String], ctx: RunContext) -> Result<(), EngineError> {
        run_ffmpeg(&self.ffmpeg, args, self.workspace.path(), ctx).await
    }

    fn read_output(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.workspace.read(name)
    }

    fn delete_staged(&self, name: &str) -> Result<(), EngineError> {
        self.workspace.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_round_trips_through_workspace() {
        let parent = tempfile::tempdir().unwrap();
        let engine =
            FfmpegEngine::with_binary(PathBuf::from("/usr/bin/ffmpeg"), Some(parent.path())).unwrap();
        engine.stage_input("input-1.mov", b"abc").unwrap();
        assert!(engine.workspace().contains("input-1.mov"));
        engine.delete_staged("input-1.mov").unwrap();
        engine.delete_staged("output-1.mp4").unwrap();
        assert!(engine.workspace().entries().is_empty());
    }

    #[test]
    fn load_with_missing_binary_fails() {
        let parent = tempfile::tempdir().unwrap();
        let settings = CompressSettings {
            ffmpeg_path: Some(parent.path().join("missing-ffmpeg")),
            ..Default::default()
        };
        assert!(matches!(
            FfmpegEngine::load(&settings),
            Err(EngineError::NotFound(_))
        ));
    }
}
