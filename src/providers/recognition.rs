//! Speech recognition provider contract and test mock.

use crate::error::{PipelineError, Result};
use crate::pipeline::frame::Chunk;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Transcription produced for one chunk.
#[derive(Debug, Clone)]
pub struct RecognitionOutput {
    /// Transcribed text, untrimmed.
    pub text: String,
    /// Provider-reported confidence, when available.
    pub confidence: Option<f32>,
}

/// Transcribes audio chunks.
///
/// Implementations must be safe to call concurrently; the dispatcher keeps
/// several calls in flight.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Transcribes one chunk in the given source language.
    async fn recognize(&self, chunk: &Chunk, source_lang: &str) -> Result<RecognitionOutput>;

    /// Name for logging and error reporting.
    fn name(&self) -> &str;
}

/// Mock recognition provider for testing.
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    name: String,
    response: String,
    /// Number of calls that fail before the mock starts succeeding.
    fail_first: Arc<AtomicUsize>,
    always_fail: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockRecognizer {
    /// Creates a mock that transcribes every chunk to a default string.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: "mock transcription".to_string(),
            fail_first: Arc::new(AtomicUsize::new(0)),
            always_fail: false,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configures the text returned for every chunk.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configures the mock to fail every call.
    pub fn with_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Configures the mock to fail the first `n` calls, then succeed.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Adds a fixed latency before each response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionProvider for MockRecognizer {
    async fn recognize(&self, chunk: &Chunk, _source_lang: &str) -> Result<RecognitionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail {
            return Err(PipelineError::RecognitionFailed {
                generation: chunk.generation,
                message: "mock recognition failure".to_string(),
            });
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::RecognitionFailed {
                generation: chunk.generation,
                message: "mock transient failure".to_string(),
            });
        }
        Ok(RecognitionOutput {
            text: self.response.clone(),
            confidence: Some(0.95),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
