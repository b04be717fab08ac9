//! Recognition dispatcher station.
//!
//! Keeps a bounded number of recognition calls in flight, retries
//! transient failures across a provider fallback chain, and releases
//! results strictly in chunk order. A chunk whose recognition ultimately
//! fails becomes a logged gap; the stream continues.

use crate::defaults;
use crate::error::{PipelineError, Result};
use crate::pipeline::dedup::trim_overlap;
use crate::pipeline::frame::{Chunk, RecognizedSegment};
use crate::pipeline::reorder::ReorderBuffer;
use crate::providers::recognition::{RecognitionOutput, RecognitionProvider};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Recognition dispatch tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Maximum concurrent recognition calls.
    pub max_in_flight: usize,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Full retry rounds across the provider chain after the first.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// Longest word run considered when trimming boundary overlap.
    pub dedup_max_words: usize,
    /// Single-word overlap matches shorter than this are kept.
    pub dedup_min_word_len: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: defaults::RECOGNITION_IN_FLIGHT,
            timeout_ms: defaults::RECOGNITION_TIMEOUT_MS,
            max_retries: defaults::PROVIDER_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            dedup_max_words: 6,
            dedup_min_word_len: 3,
        }
    }
}

impl RecognizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(PipelineError::InvalidConfiguration {
                key: "recognition.timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Completion envelope sent back from spawned recognition tasks.
struct Completed {
    generation: u64,
    start_ms: u64,
    end_ms: u64,
    is_final: bool,
    result: Result<RecognitionOutput>,
}

/// Station that turns ordered chunks into ordered recognized segments.
pub struct Recognizer {
    config: RecognizerConfig,
    providers: Vec<Arc<dyn RecognitionProvider>>,
    source_lang: String,
}

impl Recognizer {
    pub fn new(
        config: RecognizerConfig,
        providers: Vec<Arc<dyn RecognitionProvider>>,
        source_lang: &str,
    ) -> Self {
        Self {
            config,
            providers,
            source_lang: source_lang.to_string(),
        }
    }

    /// Runs until the input closes and every in-flight call has resolved.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<Chunk>,
        output: mpsc::Sender<RecognizedSegment>,
    ) -> Result<()> {
        let max_in_flight = self.config.max_in_flight.max(1);
        let (done_tx, mut done_rx) = mpsc::channel::<Completed>(max_in_flight * 2);

        let mut reorder: ReorderBuffer<Completed> = ReorderBuffer::new(0);
        let mut in_flight = 0usize;
        let mut sequence = 0u64;
        let mut prev_tail = String::new();
        let mut input_open = true;

        // The input arm is gated on spare in-flight capacity, so at the
        // window limit the loop keeps draining completions instead of
        // blocking on dispatch.
        loop {
            tokio::select! {
                chunk = input.recv(), if input_open && in_flight < max_in_flight => {
                    match chunk {
                        Some(chunk) => {
                            in_flight += 1;
                            let providers = self.providers.clone();
                            let config = self.config.clone();
                            let lang = self.source_lang.clone();
                            let done = done_tx.clone();
                            tokio::spawn(async move {
                                let result =
                                    recognize_with_retry(&providers, &chunk, &lang, &config).await;
                                done.send(Completed {
                                    generation: chunk.generation,
                                    start_ms: chunk.start_ms,
                                    end_ms: chunk.end_ms,
                                    is_final: chunk.is_final,
                                    result,
                                })
                                .await
                                .ok();
                            });
                        }
                        None => input_open = false,
                    }
                }
                done = done_rx.recv() => {
                    let Some(completed) = done else { break };
                    in_flight -= 1;
                    for released in reorder.insert(completed.generation, completed) {
                        if !self
                            .release(released, &mut sequence, &mut prev_tail, &output)
                            .await
                        {
                            return Ok(());
                        }
                    }
                }
            }

            if !input_open && in_flight == 0 {
                break;
            }
        }

        for released in reorder.drain() {
            if !self
                .release(released, &mut sequence, &mut prev_tail, &output)
                .await
            {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Emits one released completion. Returns false when downstream is gone.
    async fn release(
        &self,
        completed: Completed,
        sequence: &mut u64,
        prev_tail: &mut String,
        output: &mpsc::Sender<RecognizedSegment>,
    ) -> bool {
        match completed.result {
            Ok(recognized) => {
                let trimmed = trim_overlap(
                    prev_tail,
                    &recognized.text,
                    self.config.dedup_max_words,
                    self.config.dedup_min_word_len,
                );
                *prev_tail = tail_words(&recognized.text, self.config.dedup_max_words);
                if trimmed.is_empty() {
                    debug!(
                        generation = completed.generation,
                        "chunk text fully duplicated by overlap, skipping"
                    );
                    return true;
                }
                let segment = RecognizedSegment {
                    sequence: *sequence,
                    generation: completed.generation,
                    text: trimmed,
                    start_ms: completed.start_ms,
                    end_ms: completed.end_ms,
                    source_lang: self.source_lang.clone(),
                    confidence: recognized.confidence,
                    is_final: completed.is_final,
                };
                *sequence += 1;
                output.send(segment).await.is_ok()
            }
            Err(error) => {
                warn!(
                    generation = completed.generation,
                    %error,
                    "recognition failed after retries, gap in transcript"
                );
                true
            }
        }
    }
}

/// Retries each provider with exponential backoff before advancing to the
/// next one in the fallback chain.
async fn recognize_with_retry(
    providers: &[Arc<dyn RecognitionProvider>],
    chunk: &Chunk,
    source_lang: &str,
    config: &RecognizerConfig,
) -> Result<RecognitionOutput> {
    let mut last_error = PipelineError::RecognitionFailed {
        generation: chunk.generation,
        message: "no recognition providers configured".to_string(),
    };

    for provider in providers {
        for round in 0..=config.max_retries {
            if round > 0 {
                let shift = (round - 1).min(defaults::BACKOFF_MAX_SHIFT);
                let backoff = config.backoff_base_ms.saturating_mul(1u64 << shift);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            let call = provider.recognize(chunk, source_lang);
            match tokio::time::timeout(Duration::from_millis(config.timeout_ms), call).await {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(error)) => {
                    debug!(
                        provider = provider.name(),
                        generation = chunk.generation,
                        %error,
                        "recognition attempt failed"
                    );
                    last_error = error;
                }
                Err(_) => {
                    last_error = PipelineError::RecognitionTimeout {
                        provider: provider.name().to_string(),
                        elapsed_ms: config.timeout_ms,
                    };
                }
            }
        }
    }
    Err(last_error)
}

/// Last `max_words` whitespace words of `text`.
fn tail_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(max_words);
    words[start..].join(" ")
}
