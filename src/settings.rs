//! Host-tunable encoder and discovery settings. Budget constants live in [`crate::plan`].

use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_CRF: u32 = 28;
pub const DEFAULT_PRESET: &str = "fast";
const MAX_H264_CRF: u32 = 51;

const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CompressSettings {
    /// x264 constant rate factor used as the quality floor under the bitrate cap.
    pub crf: Option<u32>,
    pub preset: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Parent directory for the engine workspace. Defaults to the system temp dir.
    pub workspace_dir: Option<PathBuf>,
}

impl CompressSettings {
    pub fn effective_crf(&self) -> u32 {
        self.crf.unwrap_or(DEFAULT_CRF).min(MAX_H264_CRF)
    }

    /// Unknown presets fall back to the default rather than failing the encode.
    pub fn effective_preset(&self) -> &str {
        match self.preset.as_deref() {
            Some(p) if X264_PRESETS.contains(&p) => p,
            Some(p) => {
                log::warn!(
                    target: "fit_vid::settings",
                    "Unknown x264 preset {:?}, using {}",
                    p,
                    DEFAULT_PRESET
                );
                DEFAULT_PRESET
            }
            None => DEFAULT_PRESET,
        }
    }
}
