//! Parse FFmpeg `-progress` key=value output and the stderr `Duration:` banner.
//!
//! `out_time_us` and `out_time_ms` both carry microseconds (a long-standing FFmpeg quirk).

use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):(\d+(?:\.\d+)?)").expect("invalid duration regex")
});
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time_(?:us|ms)=(\d+)").expect("invalid out_time regex"));

/// Tracks the media duration and turns progress lines into a fraction in [0,1].
#[derive(Debug, Clone, Default)]
pub struct ProgressParser {
    duration: Option<f64>,
}

impl ProgressParser {
    pub fn new(duration_hint: Option<f64>) -> Self {
        Self {
            duration: duration_hint.filter(|d| d.is_finite() && *d > 0.0),
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Feeds one output line. Returns a progress fraction when the line carries one.
    ///
    /// A `Duration:` banner only fills in the duration when none is known yet; the
    /// probed hint is more reliable than the banner for containers with odd start times.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if line == "progress=end" {
            return Some(1.0);
        }
        if let Some(caps) = DURATION_RE.captures(line) {
            if self.duration.is_none() {
                let hours: f64 = caps[1].parse().unwrap_or(0.0);
                let minutes: f64 = caps[2].parse().unwrap_or(0.0);
                let seconds: f64 = caps[3].parse().unwrap_or(0.0);
                let total = hours * 3600.0 + minutes * 60.0 + seconds;
                if total > 0.0 {
                    self.duration = Some(total);
                }
            }
            return None;
        }
        let caps = OUT_TIME_RE.captures(line)?;
        let duration = self.duration?;
        let micros: u64 = caps[1].parse().ok()?;
        let elapsed = micros as f64 / 1_000_000.0;
        Some((elapsed / duration).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_banner_sets_duration() {
        let mut p = ProgressParser::new(None);
        assert_eq!(p.feed("  Duration: 00:01:30.50, start: 0.000000, bitrate: 1205 kb/s"), None);
        assert_eq!(p.duration(), Some(90.5));
    }

    #[test]
    fn hint_wins_over_banner() {
        let mut p = ProgressParser::new(Some(10.0));
        p.feed("Duration: 00:00:12.00");
        assert_eq!(p.duration(), Some(10.0));
    }

    #[test]
    fn invalid_hint_is_ignored() {
        assert_eq!(ProgressParser::new(Some(0.0)).duration(), None);
        assert_eq!(ProgressParser::new(Some(f64::NAN)).duration(), None);
    }

    #[test]
    fn out_time_us_progress() {
        let mut p = ProgressParser::new(Some(10.0));
        assert_eq!(p.feed("out_time_us=5000000"), Some(0.5));
    }

    #[test]
    fn out_time_ms_is_microseconds() {
        let mut p = ProgressParser::new(Some(10.0));
        assert_eq!(p.feed("out_time_ms=2500000"), Some(0.25));
    }

    #[test]
    fn progress_is_clamped() {
        let mut p = ProgressParser::new(Some(1.0));
        assert_eq!(p.feed("out_time_us=3000000"), Some(1.0));
    }

    #[test]
    fn out_time_without_duration_is_ignored() {
        let mut p = ProgressParser::new(None);
        assert_eq!(p.feed("out_time_us=3000000"), None);
    }

    #[test]
    fn progress_end_is_complete() {
        let mut p = ProgressParser::new(None);
        assert_eq!(p.feed("progress=end"), Some(1.0));
        assert_eq!(p.feed("progress=continue"), None);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let mut p = ProgressParser::new(Some(5.0));
        assert_eq!(p.feed("bitrate= 800.0kbits/s"), None);
        assert_eq!(p.feed("out_time=00:00:01.000000"), None);
    }
}
