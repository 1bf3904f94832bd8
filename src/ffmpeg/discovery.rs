//! Locate the ffmpeg/ffprobe binaries and list the encoders a build ships with.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::engine::EngineError;

#[cfg(target_os = "windows")]
const LOOKUP_COMMAND: &str = "where";
#[cfg(not(target_os = "windows"))]
const LOOKUP_COMMAND: &str = "which";

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let output = Command::new(LOOKUP_COMMAND).arg(binary).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

fn env_path(var: &str) -> Option<PathBuf> {
    let value = std::env::var_os(var)?;
    let path = PathBuf::from(value);
    if path.exists() {
        log::debug!(
            target: "fit_vid::ffmpeg::discovery",
            "{} from env: {}",
            var,
            path.display()
        );
        Some(path)
    } else {
        log::warn!(
            target: "fit_vid::ffmpeg::discovery",
            "{} points at a missing file: {}",
            var,
            path.display()
        );
        None
    }
}

fn search_ffmpeg() -> Result<PathBuf, EngineError> {
    if let Some(p) = env_path("FFMPEG_PATH") {
        return Ok(p);
    }
    if let Some(p) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "fit_vid::ffmpeg::discovery",
            "FFmpeg found in common path: {}",
            p.display()
        );
        return Ok(p);
    }
    if let Some(p) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        log::debug!(
            target: "fit_vid::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "fit_vid::ffmpeg::discovery",
        "FFmpeg not found in FFMPEG_PATH, common locations or PATH"
    );
    Err(EngineError::NotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Resolves FFmpeg. An explicit path wins and bypasses the process-wide cache;
/// otherwise FFMPEG_PATH, common install locations, then PATH, cached for the process lifetime.
pub fn resolve_ffmpeg(explicit: Option<&Path>) -> Result<PathBuf, EngineError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(EngineError::NotFound(format!(
            "Configured FFmpeg path does not exist: {}",
            path.display()
        )));
    }
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.clone());
    }
    let path = search_ffmpeg()?;
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| path).clone())
}

/// ffprobe candidates next to an ffmpeg binary: platform-suffixed name first, then plain.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = if cfg!(target_os = "windows") { ".exe" } else { "" };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(format!("ffprobe{suffix}{exe}")));
    }
    candidates.push(parent.join(format!("ffprobe{exe}")));
    candidates
}

/// Resolves ffprobe: explicit path, FFPROBE_PATH, next to FFmpeg, then PATH.
pub fn resolve_ffprobe(
    explicit: Option<&Path>,
    ffmpeg_hint: Option<&Path>,
) -> Result<PathBuf, EngineError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(EngineError::NotFound(format!(
            "Configured ffprobe path does not exist: {}",
            path.display()
        )));
    }
    if let Some(p) = env_path("FFPROBE_PATH") {
        return Ok(p);
    }
    if let Ok(ffmpeg) = resolve_ffmpeg(ffmpeg_hint) {
        if let Some(p) = ffprobe_candidates(&ffmpeg).into_iter().find(|p| p.exists()) {
            return Ok(p);
        }
    }
    find_in_path("ffprobe")
        .filter(|p| p.exists())
        .ok_or_else(|| EngineError::NotFound("ffprobe not found next to FFmpeg or in PATH".into()))
}

/// Parses `ffmpeg -encoders` output into encoder names.
///
/// Lines look like ` V....D libx264   libx264 H.264 / AVC ...`; the legend above the
/// `------` separator is skipped.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

pub fn get_available_encoders(ffmpeg: &Path) -> Result<Vec<String>, EngineError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| EngineError::from(format!("Failed to run FFmpeg: {}", e)))?;
    if !output.status.success() {
        return Err(EngineError::failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr),
        ));
    }
    Ok(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
}
