//! Turn FFmpeg exit codes and stderr into a short summary plus full detail.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

const SUMMARY_MAX_BYTES: usize = 120;
const ELLIPSIS: &str = "…";

/// Lines FFmpeg prints on failure that name the actual cause.
const CAUSE_MARKERS: &[&str] = &[
    "error",
    "invalid",
    "unknown encoder",
    "no such file",
    "not supported",
    "could not",
    "failed",
];

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(-1) => "FFmpeg not found or failed to start.".to_string(),
        Some(69) => "Encoding rate limit exceeded.".to_string(),
        Some(123) | Some(255) => "Encoding was stopped.".to_string(),
        Some(code) => match cause_line(stderr) {
            Some(line) => format!("FFmpeg failed: {}", truncate(line, SUMMARY_MAX_BYTES)),
            None => format!("FFmpeg failed (exit code {}).", code),
        },
        None => match cause_line(stderr).or_else(|| first_non_empty(stderr)) {
            Some(line) => truncate(line, SUMMARY_MAX_BYTES),
            None => "FFmpeg failed.".to_string(),
        },
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// Last stderr line that looks like a failure cause. FFmpeg prints the root cause last.
fn cause_line(stderr: &str) -> Option<&str> {
    stderr.lines().rev().map(str::trim).find(|line| {
        let lower = line.to_ascii_lowercase();
        CAUSE_MARKERS.iter().any(|m| lower.contains(m))
    })
}

fn first_non_empty(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).find(|l| !l.is_empty())
}

fn truncate(line: &str, max_len: usize) -> String {
    if line.len() <= max_len {
        return line.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &line[..cut], ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failure() {
        let p = parse_ffmpeg_error("Failed to spawn FFmpeg", Some(-1));
        assert_eq!(p.summary, "FFmpeg not found or failed to start.");
        assert_eq!(p.detail, "Failed to spawn FFmpeg");
    }

    #[test]
    fn rate_limit_and_stop_codes() {
        assert_eq!(parse_ffmpeg_error("", Some(69)).summary, "Encoding rate limit exceeded.");
        assert_eq!(parse_ffmpeg_error("", Some(255)).summary, "Encoding was stopped.");
        assert_eq!(parse_ffmpeg_error("", Some(123)).summary, "Encoding was stopped.");
    }

    #[test]
    fn general_failure_uses_last_cause_line() {
        let stderr = "Input #0, mov,mp4\n  Duration: 00:00:05.00\n\
                      [libx264 @ 0x1] Error initializing output stream\n\
                      Conversion failed!";
        let p = parse_ffmpeg_error(stderr, Some(1));
        assert_eq!(p.summary, "FFmpeg failed: Conversion failed!");
    }

    #[test]
    fn unknown_code_without_cause() {
        let p = parse_ffmpeg_error("frame=  10 fps=0.0", Some(42));
        assert_eq!(p.summary, "FFmpeg failed (exit code 42).");
        assert_eq!(p.detail, "frame=  10 fps=0.0");
    }

    #[test]
    fn no_code_uses_stderr() {
        let p = parse_ffmpeg_error("Some random message\nSecond line", None);
        assert_eq!(p.summary, "Some random message");
    }

    #[test]
    fn empty_stderr_without_code() {
        assert_eq!(parse_ffmpeg_error("  ", None).summary, "FFmpeg failed.");
    }

    #[test]
    fn long_cause_is_truncated_on_char_boundary() {
        let long = format!("error: {}", "é".repeat(100));
        let p = parse_ffmpeg_error(&long, None);
        assert!(p.summary.len() <= SUMMARY_MAX_BYTES);
        assert!(p.summary.ends_with('…'));
    }
}
