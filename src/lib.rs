mod compress;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod media;
pub mod plan;
pub mod probe;
pub mod session;
pub mod settings;
#[cfg(any(test, feature = "integration-test-api"))]
pub mod test_support;

pub use compress::{Compressor, TranscodeRequest};
pub use engine::{EngineError, ProgressCallback, RunContext, TranscodeEngine};
pub use error::{ErrorPayload, TranscodeError};
pub use media::{CompressedMedia, MediaSource};
pub use plan::{EncodingPlan, needs_compression};
pub use probe::{DurationProbe, FfprobeDurationProbe};
pub use session::{EngineSession, ProgressSink};
pub use settings::CompressSettings;
