//! Error taxonomy for compress-to-size calls, plus the payload hosts receive.

use crate::engine::EngineError;
use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not determine media duration: {0}")]
    Metadata(String),

    #[error(
        "Target size of {target_size_bytes} bytes is not achievable for {duration_seconds}s of video"
    )]
    InfeasibleTarget {
        target_size_bytes: u64,
        duration_seconds: f64,
    },

    /// Engine failure. `code` is the engine exit code when one was reported.
    #[error("Encoding failed: {diagnostic}")]
    Encode {
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("Aborted")]
    Aborted,
}

impl TranscodeError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata(message.into())
    }

    pub fn encode(diagnostic: impl Into<String>) -> Self {
        Self::Encode {
            code: None,
            diagnostic: diagnostic.into(),
        }
    }

    /// Short, stable identifier for hosts that switch on the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalidRequest",
            Self::Metadata(_) => "metadata",
            Self::InfeasibleTarget { .. } => "infeasibleTarget",
            Self::Encode { .. } => "encode",
            Self::Aborted => "aborted",
        }
    }
}

impl From<EngineError> for TranscodeError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Aborted => Self::Aborted,
            EngineError::Failed { code, stderr } => Self::Encode {
                code: Some(code),
                diagnostic: stderr,
            },
            other => Self::encode(other.to_string()),
        }
    }
}

/// Host-facing failure report: a stable kind, a one-line summary and the full detail.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub summary: String,
    pub detail: String,
}

impl From<&TranscodeError> for ErrorPayload {
    fn from(err: &TranscodeError) -> Self {
        let (summary, detail) = match err {
            TranscodeError::Encode { code, diagnostic } => {
                let payload = parse_ffmpeg_error(diagnostic, *code);
                (payload.summary, payload.detail)
            }
            other => (other.to_string(), other.to_string()),
        };
        Self {
            kind: err.kind(),
            summary,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_abort_maps_to_aborted() {
        let e = TranscodeError::from(EngineError::Aborted);
        assert!(matches!(e, TranscodeError::Aborted));
    }

    #[test]
    fn engine_failure_keeps_code_and_diagnostic() {
        let e = TranscodeError::from(EngineError::Failed {
            code: 1,
            stderr: "Unknown encoder 'libx264'".into(),
        });
        match e {
            TranscodeError::Encode { code, diagnostic } => {
                assert_eq!(code, Some(1));
                assert_eq!(diagnostic, "Unknown encoder 'libx264'");
            }
            other => panic!("expected Encode, got {other:?}"),
        }
    }

    #[test]
    fn engine_io_error_is_encode_without_code() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = TranscodeError::from(EngineError::Io(io));
        assert!(matches!(e, TranscodeError::Encode { code: None, .. }));
    }

    #[test]
    fn encode_payload_uses_exit_code_summary() {
        let e = TranscodeError::Encode {
            code: Some(69),
            diagnostic: "rate exceeded".into(),
        };
        let v = serde_json::to_value(ErrorPayload::from(&e)).unwrap();
        assert_eq!(v["kind"], "encode");
        assert_eq!(v["summary"], "Encoding rate limit exceeded.");
        assert_eq!(v["detail"], "rate exceeded");
    }

    #[test]
    fn internal_engine_failure_is_not_reported_as_missing_ffmpeg() {
        let e = TranscodeError::from(EngineError::from("Failed to read staged output out.mp4"));
        let payload = ErrorPayload::from(&e);
        assert_eq!(payload.kind, "encode");
        assert_ne!(payload.summary, "FFmpeg not found or failed to start.");
        assert!(payload.summary.contains("staged output"), "{}", payload.summary);
    }

    #[test]
    fn aborted_payload_is_plain() {
        let payload = ErrorPayload::from(&TranscodeError::Aborted);
        assert_eq!(payload.kind, "aborted");
        assert_eq!(payload.summary, "Aborted");
        assert_eq!(payload.detail, "Aborted");
    }
}
