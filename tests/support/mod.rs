#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use fit_vid_core::ffmpeg::discovery::{get_available_encoders, resolve_ffmpeg};
use fit_vid_core::ffmpeg::{AUDIO_CODEC, VIDEO_CODEC};

/// Panics with a readable report when FFmpeg lacks an encoder the compressor needs.
pub fn assert_encoder_contract(ffmpeg: &Path) {
    let mut available = get_available_encoders(ffmpeg).unwrap_or_else(|e| {
        panic!(
            "Encoder contract failed.\nFFmpeg path: {}\nFailed to list encoders: {}",
            ffmpeg.display(),
            e
        )
    });
    available.sort();
    let missing: Vec<&str> = [VIDEO_CODEC, AUDIO_CODEC]
        .into_iter()
        .filter(|codec| !available.iter().any(|c| c == codec))
        .collect();
    assert!(
        missing.is_empty(),
        "Encoder contract failed.\nFFmpeg path: {}\nMissing encoders: {:?}",
        ffmpeg.display(),
        missing
    );
}

pub enum VideoKind {
    Plain,
    WithAudio,
}

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = resolve_ffmpeg(None).expect("FFmpeg not found");
        assert_encoder_contract(&ffmpeg);
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn with_test_video(&self, input_name: &str, duration_secs: f32, kind: VideoKind) -> PathBuf {
        let output_path = self.path(input_name);
        let status = create_test_video(&self.ffmpeg, &output_path, duration_secs, kind)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    kind: VideoKind,
) -> std::io::Result<ExitStatus> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-loglevel", "error", "-y", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={}:size=320x240:rate=30", duration_secs));
    if let VideoKind::WithAudio = kind {
        cmd.args(["-f", "lavfi", "-i"])
            .arg(format!("sine=frequency=440:duration={}", duration_secs))
            .args(["-c:a", "aac"]);
    }
    cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
        .arg(output_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

/// Stream codec names of `path`, as reported by ffprobe.
pub fn stream_codecs(ffprobe: &Path, path: &Path) -> Vec<String> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_name",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .expect("run ffprobe");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
