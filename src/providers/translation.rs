//! Translation provider contract and test mock.

use crate::error::{PipelineError, Result};
use crate::pipeline::context::ContextEntry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Translates text with conversational context.
///
/// Implementations must be safe to call concurrently. Summarization is an
/// optional capability used by context compression; providers that cannot
/// summarize keep the default implementation.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translates `text` from `source_lang` to `target_lang`, given recent
    /// conversation entries ordered oldest first.
    async fn translate(
        &self,
        text: &str,
        context: &[ContextEntry],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String>;

    /// Whether this provider can condense context entries into a summary.
    fn supports_summarization(&self) -> bool {
        false
    }

    /// Condenses `entries` into a single summary in the source language.
    ///
    /// Only called when [`supports_summarization`](Self::supports_summarization)
    /// returns true.
    async fn summarize(&self, _entries: &[ContextEntry]) -> Result<String> {
        Err(PipelineError::Other(
            "provider does not support summarization".to_string(),
        ))
    }

    /// Name for logging and error reporting.
    fn name(&self) -> &str;
}

/// Mock translation provider for testing.
#[derive(Debug, Clone)]
pub struct MockTranslator {
    name: String,
    /// Translation prefix; the output is `"{prefix}{input}"` so tests can
    /// assert both that translation happened and what it saw.
    prefix: String,
    fail_first: Arc<AtomicUsize>,
    always_fail: bool,
    delay: Option<Duration>,
    summarizes: bool,
    calls: Arc<AtomicUsize>,
    /// Context sizes observed per call, for snapshot-isolation assertions.
    seen_context_sizes: Arc<Mutex<Vec<usize>>>,
}

impl MockTranslator {
    /// Creates a mock that echoes input prefixed with `"[tgt] "`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: "[tgt] ".to_string(),
            fail_first: Arc::new(AtomicUsize::new(0)),
            always_fail: false,
            delay: None,
            summarizes: false,
            calls: Arc::new(AtomicUsize::new(0)),
            seen_context_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configures the prefix prepended to every translation.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
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

    /// Enables the summarization capability.
    pub fn with_summarization(mut self) -> Self {
        self.summarizes = true;
        self
    }

    /// Total translate calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context entry counts seen by each translate call, in call order.
    pub fn seen_context_sizes(&self) -> Vec<usize> {
        self.seen_context_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TranslationProvider for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        context: &[ContextEntry],
        _source_lang: &str,
        _target_lang: &str,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.seen_context_sizes.lock() {
            sizes.push(context.len());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail {
            return Err(PipelineError::TranslationFailed {
                sequence: 0,
                message: "mock translation failure".to_string(),
            });
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::TranslationFailed {
                sequence: 0,
                message: "mock transient failure".to_string(),
            });
        }
        Ok(format!("{}{}", self.prefix, text))
    }

    fn supports_summarization(&self) -> bool {
        self.summarizes
    }

    async fn summarize(&self, entries: &[ContextEntry]) -> Result<String> {
        if !self.summarizes {
            return Err(PipelineError::Other(
                "provider does not support summarization".to_string(),
            ));
        }
        Ok(format!("summary of {} entries", entries.len()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_translator_prefixes_input() {
        let provider = MockTranslator::new("primary").with_prefix("EN: ");
        let output = provider.translate("こんにちは", &[], "ja", "en").await.unwrap();
        assert_eq!(output, "EN: こんにちは");
    }

    #[tokio::test]
    async fn test_mock_translator_fails_when_configured() {
        let provider = MockTranslator::new("primary").with_failure();
        let result = provider.translate("hello", &[], "en", "ja").await;
        assert!(matches!(
            result,
            Err(PipelineError::TranslationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_translator_records_context_sizes() {
        let provider = MockTranslator::new("primary");
        let entry = ContextEntry::new("a", "b", 0);
        provider.translate("one", &[], "ja", "en").await.unwrap();
        provider
            .translate("two", std::slice::from_ref(&entry), "ja", "en")
            .await
            .unwrap();
        assert_eq!(provider.seen_context_sizes(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_summarization_capability_gating() {
        let plain = MockTranslator::new("plain");
        assert!(!plain.supports_summarization());
        assert!(plain.summarize(&[]).await.is_err());

        let capable = MockTranslator::new("capable").with_summarization();
        assert!(capable.supports_summarization());
        let summary = capable.summarize(&[]).await.unwrap();
        assert_eq!(summary, "summary of 0 entries");
    }
}
