//! Error types for lingostream.

use crate::pipeline::frame::Chunk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    // Configuration errors (fatal, pre-start validation)
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfiguration { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid pipeline state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Segmenter errors
    #[error("Segmenter buffer overflow, chunk {generation} flushed early")]
    BufferOverflow { generation: u64, chunk: Box<Chunk> },

    // Recognition errors
    #[error("Recognition call to {provider} timed out after {elapsed_ms}ms")]
    RecognitionTimeout { provider: String, elapsed_ms: u64 },

    #[error("Recognition failed for chunk {generation}: {message}")]
    RecognitionFailed { generation: u64, message: String },

    // Translation errors
    #[error("Translation rate limit exceeded, wait queue full at depth {queue_depth}")]
    RateLimited { queue_depth: usize },

    #[error("Translation failed for segment {sequence}: {message}")]
    TranslationFailed { sequence: u64, message: String },

    // Output sink errors
    #[error("Output sink error: {message}")]
    Sink { message: String },

    // Audio replay errors
    #[error("Audio source error: {message}")]
    Audio { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Returns true for errors that terminate the pipeline.
    ///
    /// Everything else is converted into degraded-but-continuing behavior:
    /// skipped segments, source-only records, retried sink writes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfiguration { .. }
                | PipelineError::Config(_)
                | PipelineError::InvalidTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_invalid_configuration_display() {
        let error = PipelineError::InvalidConfiguration {
            key: "overlap_ms".to_string(),
            message: "must be smaller than chunk_ms".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for overlap_ms: must be smaller than chunk_ms"
        );
        assert!(error.is_fatal());
    }

    #[test]
    fn test_recognition_timeout_display() {
        let error = PipelineError::RecognitionTimeout {
            provider: "primary".to_string(),
            elapsed_ms: 30000,
        };
        assert_eq!(
            error.to_string(),
            "Recognition call to primary timed out after 30000ms"
        );
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_rate_limited_display() {
        let error = PipelineError::RateLimited { queue_depth: 10 };
        assert_eq!(
            error.to_string(),
            "Translation rate limit exceeded, wait queue full at depth 10"
        );
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_translation_failed_display() {
        let error = PipelineError::TranslationFailed {
            sequence: 5,
            message: "all providers exhausted".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Translation failed for segment 5: all providers exhausted"
        );
    }

    #[test]
    fn test_sink_display() {
        let error = PipelineError::Sink {
            message: "document unavailable".to_string(),
        };
        assert_eq!(error.to_string(), "Output sink error: document unavailable");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_invalid_transition_display() {
        let error = PipelineError::InvalidTransition {
            from: "Draining".to_string(),
            to: "Active".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid pipeline state transition: Draining -> Active"
        );
        assert!(error.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: PipelineError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: PipelineError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PipelineError>();
        assert_sync::<PipelineError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
