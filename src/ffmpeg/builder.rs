//! FFmpeg argument list for a size-capped H.264/AAC encode.

use crate::plan::EncodingPlan;
use crate::settings::CompressSettings;

pub const VIDEO_CODEC: &str = "libx264";
pub const AUDIO_CODEC: &str = "aac";

/// CRF sets the quality floor; `-b:v`/`-maxrate`/`-bufsize` cap the rate. The cap binds
/// whenever the source is too complex for the budget, the CRF keeps already-small
/// sources from being over-compressed. `+faststart` moves the moov atom to the front.
pub fn build_compress_args(
    input_name: &str,
    output_name: &str,
    plan: &EncodingPlan,
    settings: &CompressSettings,
) -> Vec<String> {
    let crf = settings.effective_crf();
    let preset = settings.effective_preset();

    log::debug!(
        target: "fit_vid::ffmpeg::builder",
        "Building FFmpeg command: crf={}, preset={}, b:v={}, maxrate={}, bufsize={}, {} -> {}",
        crf,
        preset,
        plan.video_bitrate_bps,
        plan.max_rate_bps,
        plan.buffer_size_bps,
        input_name,
        output_name
    );

    let mut args: Vec<String> = [
        "-nostdin",
        "-y",
        "-hide_banner",
        "-nostats",
        "-progress",
        "pipe:1",
        "-i",
        input_name,
        "-map",
        "0:v:0",
        "-map",
        "0:a:0?",
        "-c:v",
        VIDEO_CODEC,
        "-preset",
        preset,
    ]
    .into_iter()
    .map(str::to_string)
    .collect();

    args.extend([
        "-crf".to_string(),
        crf.to_string(),
        "-b:v".to_string(),
        plan.video_bitrate_bps.to_string(),
        "-maxrate".to_string(),
        plan.max_rate_bps.to_string(),
        "-bufsize".to_string(),
        plan.buffer_size_bps.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        AUDIO_CODEC.to_string(),
        "-b:a".to_string(),
        plan.audio_bitrate_bps.to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output_name.to_string(),
    ]);
    args
}

/// Formats args for readable display: option and value on one line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match iter.peek() {
            Some(value) if arg.starts_with('-') && !value.starts_with('-') => {
                lines.push(format!("  {} {}", arg, value));
                iter.next();
            }
            _ => lines.push(format!("  {}", arg)),
        }
    }
    lines.join("\n")
}
