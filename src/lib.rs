//! lingostream - Streaming speech transcription and translation
//!
//! Adaptive audio segmentation, concurrent recognition with ordered
//! release, and context-aware translation delivered in order to an
//! output sink.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod source;
pub mod vad;

// Core collaborator traits (source → recognize → translate → sink)
pub use providers::recognition::RecognitionProvider;
pub use providers::sink::OutputSink;
pub use providers::translation::TranslationProvider;
pub use source::FrameSource;
pub use vad::VoiceActivityDetector;

// Pipeline
pub use pipeline::orchestrator::{Pipeline, PipelineConfig, PipelineHandle};
pub use pipeline::{AudioFrame, Chunk, RecognizedSegment, TranslationRecord};

// Error handling
pub use error::{PipelineError, Result};

// Config
pub use config::Config;

/// Initialize structured logging from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
