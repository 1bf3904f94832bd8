mod builder;
pub mod discovery;
mod engine;
mod error;
mod progress;
mod runner;
pub mod workspace;

pub use builder::{
    AUDIO_CODEC, VIDEO_CODEC, build_compress_args, format_args_for_display_multiline,
};
pub use engine::FfmpegEngine;
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use progress::ProgressParser;
pub use runner::run_ffmpeg;
pub use workspace::{Workspace, cleanup_stale_workspaces};

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
