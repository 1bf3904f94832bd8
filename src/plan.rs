//! Bitrate budget for hitting a size ceiling.
//!
//! The plan is a pure function of `(duration_seconds, target_size_bytes)`. Ten percent of
//! the bit budget is held back for audio and container overhead; the rest is spread evenly
//! over the duration as the average video bitrate. `maxrate`/`bufsize` bound short-term
//! excursions so VBV smoothing cannot push the file past the ceiling.

use crate::error::TranscodeError;

/// Share of the total bit budget given to the video stream.
pub const VIDEO_BUDGET_SHARE: f64 = 0.9;
/// Fixed AAC bitrate. Not traded off against video beyond the reserved share.
pub const AUDIO_BITRATE_BPS: u64 = 128_000;
pub const MAX_RATE_FACTOR: f64 = 1.2;
pub const BUFFER_SIZE_FACTOR: u64 = 2;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingPlan {
    pub duration_seconds: f64,
    pub video_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
    pub max_rate_bps: u64,
    pub buffer_size_bps: u64,
}

impl EncodingPlan {
    pub fn for_target(duration_seconds: f64, target_size_bytes: u64) -> Result<Self, TranscodeError> {
        if target_size_bytes == 0 {
            return Err(TranscodeError::invalid_request(
                "target size must be greater than zero",
            ));
        }
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(TranscodeError::metadata(format!(
                "duration must be a positive number of seconds, got {}",
                duration_seconds
            )));
        }

        let total_bit_budget = target_size_bytes as f64 * 8.0;
        let video_bit_budget = total_bit_budget * VIDEO_BUDGET_SHARE;
        let video_bitrate = (video_bit_budget / duration_seconds).floor();
        // Also rejects NaN from pathological inputs.
        if !(video_bitrate >= 1.0) {
            return Err(TranscodeError::InfeasibleTarget {
                target_size_bytes,
                duration_seconds,
            });
        }
        let video_bitrate_bps = video_bitrate as u64;

        Ok(Self {
            duration_seconds,
            video_bitrate_bps,
            audio_bitrate_bps: AUDIO_BITRATE_BPS,
            max_rate_bps: (video_bitrate_bps as f64 * MAX_RATE_FACTOR).floor() as u64,
            buffer_size_bps: video_bitrate_bps.saturating_mul(BUFFER_SIZE_FACTOR),
        })
    }

    /// Expected output size if the encoder hits both average bitrates exactly.
    pub fn nominal_size_bytes(&self) -> u64 {
        let bits = self.video_bitrate_bps.saturating_add(self.audio_bitrate_bps) as f64
            * self.duration_seconds;
        (bits / 8.0).round() as u64
    }
}

/// True when a file of `size_bytes` is strictly larger than `max_size_mb` mebibytes.
pub fn needs_compression(size_bytes: u64, max_size_mb: f64) -> bool {
    size_bytes as f64 > max_size_mb * BYTES_PER_MB
}
