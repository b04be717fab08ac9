//! Translation dispatcher station.
//!
//! Translates recognized segments with per-speaker context, under a
//! token-bucket rate limit and a bounded in-flight window. Records are
//! released strictly in sequence order; a persistent translation failure
//! forwards the source text rather than dropping the utterance.

use crate::defaults;
use crate::error::{PipelineError, Result};
use crate::pipeline::context::ContextBufferManager;
use crate::pipeline::frame::{RecognizedSegment, TranslationRecord};
use crate::pipeline::profile::Profile;
use crate::pipeline::ratelimit::{RateLimiter, RateLimiterConfig};
use crate::pipeline::reorder::ReorderBuffer;
use crate::providers::translation::TranslationProvider;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Translation dispatch tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Maximum concurrent translation calls.
    pub max_in_flight: usize,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Full retry rounds across the provider chain after the first.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub backoff_base_ms: u64,
    pub rate: RateLimiterConfig,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: defaults::RECOGNITION_IN_FLIGHT,
            timeout_ms: defaults::TRANSLATION_TIMEOUT_MS,
            max_retries: defaults::PROVIDER_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            rate: RateLimiterConfig::default(),
        }
    }
}

impl TranslatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(PipelineError::InvalidConfiguration {
                key: "translation.timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        self.rate.validate()
    }
}

struct Completed {
    segment: RecognizedSegment,
    outcome: Result<String>,
}

/// Station that turns ordered segments into ordered translation records.
pub struct Translator {
    config: TranslatorConfig,
    providers: Vec<Arc<dyn TranslationProvider>>,
    context: ContextBufferManager,
    tuning_updates: Option<watch::Receiver<Profile>>,
    speaker: String,
    target_lang: String,
    /// Wall-clock epoch of stream position zero, milliseconds since the
    /// Unix epoch.
    epoch_ms: u64,
}

impl Translator {
    pub fn new(
        config: TranslatorConfig,
        providers: Vec<Arc<dyn TranslationProvider>>,
        context: ContextBufferManager,
        speaker: &str,
        target_lang: &str,
    ) -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            config,
            providers,
            context,
            tuning_updates: None,
            speaker: speaker.to_string(),
            target_lang: target_lang.to_string(),
            epoch_ms,
        }
    }

    /// Subscribes to profile tuning changes applied at segment boundaries.
    pub fn with_tuning_updates(mut self, updates: watch::Receiver<Profile>) -> Self {
        self.tuning_updates = Some(updates);
        self
    }

    /// Runs until the input closes and every in-flight call has resolved.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<RecognizedSegment>,
        output: mpsc::Sender<TranslationRecord>,
    ) -> Result<()> {
        let max_in_flight = self.config.max_in_flight.max(1);
        let mut limiter = RateLimiter::new(self.config.rate.clone());
        let (done_tx, mut done_rx) = mpsc::channel::<Completed>(max_in_flight * 2);

        let mut reorder: ReorderBuffer<Completed> = ReorderBuffer::new(0);
        let mut in_flight = 0usize;
        let mut input_open = true;

        // The input arm is gated on spare in-flight capacity, so at the
        // window limit the loop keeps draining completions instead of
        // blocking on dispatch. With a window of one this also means a
        // segment's context snapshot includes the previous commit.
        loop {
            tokio::select! {
                segment = input.recv(), if input_open && in_flight < max_in_flight => {
                    match segment {
                        Some(segment) => {
                            self.apply_tuning_update(&mut limiter);
                            in_flight += 1;

                            // Snapshot at dispatch time so the window a call
                            // sees never mutates mid-flight.
                            let window = self.context.snapshot(&self.speaker);
                            let providers = self.providers.clone();
                            let config = self.config.clone();
                            let limiter = limiter.clone();
                            let target_lang = self.target_lang.clone();
                            let done = done_tx.clone();
                            tokio::spawn(async move {
                                let outcome = translate_segment(
                                    &providers,
                                    &segment,
                                    &window.entries,
                                    &target_lang,
                                    &limiter,
                                    &config,
                                )
                                .await;
                                done.send(Completed { segment, outcome }).await.ok();
                            });
                        }
                        None => input_open = false,
                    }
                }
                done = done_rx.recv() => {
                    let Some(completed) = done else { break };
                    in_flight -= 1;
                    for released in reorder.insert(completed.segment.sequence, completed) {
                        if !self.release(released, &output).await? {
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
            if !self.release(released, &output).await? {
                return Ok(());
            }
        }
        self.context.flush().await?;
        Ok(())
    }

    /// Applies a staged profile: context tuning always, rate budget when
    /// the profile carries an override. In-flight calls keep the limiter
    /// they were dispatched with.
    fn apply_tuning_update(&mut self, limiter: &mut RateLimiter) {
        if let Some(updates) = self.tuning_updates.as_mut()
            && updates.has_changed().unwrap_or(false)
        {
            let profile = updates.borrow_and_update().clone();
            debug!(profile = %profile.name, "applying updated translation tuning");
            self.context.apply_config(profile.context);
            if let Some(rate) = profile.rate {
                *limiter = RateLimiter::new(rate);
            }
        }
    }

    /// Emits one released record and commits it to the speaker's context.
    /// Returns Ok(false) when downstream is gone.
    async fn release(
        &mut self,
        completed: Completed,
        output: &mpsc::Sender<TranslationRecord>,
    ) -> Result<bool> {
        let segment = completed.segment;
        let timestamp_ms = self.epoch_ms + segment.start_ms;
        let record = match completed.outcome {
            Ok(translated) => {
                if !translated.is_empty() {
                    self.context
                        .append(&self.speaker, &segment.text, &translated, timestamp_ms)
                        .await?;
                }
                TranslationRecord {
                    sequence: segment.sequence,
                    speaker: self.speaker.clone(),
                    timestamp_ms,
                    source_text: segment.text,
                    translated_text: translated,
                    source_lang: segment.source_lang,
                    target_lang: self.target_lang.clone(),
                    translation_failed: false,
                }
            }
            Err(error) => {
                warn!(
                    sequence = segment.sequence,
                    %error,
                    "translation failed, forwarding source text only"
                );
                TranslationRecord {
                    sequence: segment.sequence,
                    speaker: self.speaker.clone(),
                    timestamp_ms,
                    source_text: segment.text,
                    translated_text: String::new(),
                    source_lang: segment.source_lang,
                    target_lang: self.target_lang.clone(),
                    translation_failed: true,
                }
            }
        };
        Ok(output.send(record).await.is_ok())
    }
}

/// One rate-limited, retried translation call chain for a segment.
async fn translate_segment(
    providers: &[Arc<dyn TranslationProvider>],
    segment: &RecognizedSegment,
    context: &[crate::pipeline::context::ContextEntry],
    target_lang: &str,
    limiter: &RateLimiter,
    config: &TranslatorConfig,
) -> Result<String> {
    // Nothing to translate; no provider call, no rate-limit token.
    if segment.text.trim().is_empty() {
        return Ok(String::new());
    }

    limiter.acquire().await?;

    let mut last_error = PipelineError::TranslationFailed {
        sequence: segment.sequence,
        message: "no translation providers configured".to_string(),
    };

    for provider in providers {
        for round in 0..=config.max_retries {
            if round > 0 {
                let shift = (round - 1).min(defaults::BACKOFF_MAX_SHIFT);
                let backoff = config.backoff_base_ms.saturating_mul(1u64 << shift);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            let call =
                provider.translate(&segment.text, context, &segment.source_lang, target_lang);
            match tokio::time::timeout(Duration::from_millis(config.timeout_ms), call).await {
                Ok(Ok(translated)) => return Ok(translated),
                Ok(Err(error)) => {
                    debug!(
                        provider = provider.name(),
                        sequence = segment.sequence,
                        %error,
                        "translation attempt failed"
                    );
                    last_error = error;
                }
                Err(_) => {
                    last_error = PipelineError::TranslationFailed {
                        sequence: segment.sequence,
                        message: format!(
                            "call to {} timed out after {}ms",
                            provider.name(),
                            config.timeout_ms
                        ),
                    };
                }
            }
        }
    }
    Err(last_error)
}
