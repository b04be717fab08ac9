//! Per-speaker translation context.
//!
//! Each speaker owns a bounded window of recent (source, translation)
//! pairs. The window is handed to the translation provider as a
//! point-in-time snapshot; mutation never races an in-flight call.

use crate::defaults;
use crate::error::Result;
use crate::providers::translation::TranslationProvider;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// One prior utterance kept for translation continuity.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub source_text: String,
    pub translated_text: String,
    /// Estimated token cost of both texts.
    pub token_cost: u32,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl ContextEntry {
    pub fn new(source_text: &str, translated_text: &str, timestamp_ms: u64) -> Self {
        let token_cost = estimate_tokens(source_text) + estimate_tokens(translated_text);
        Self {
            source_text: source_text.to_string(),
            translated_text: translated_text.to_string(),
            token_cost,
            timestamp_ms,
        }
    }
}

/// Rough token cost: one token per four characters, rounded up.
/// Deliberately conservative for CJK input, where every character counts.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Immutable point-in-time view of a speaker's context.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub entries: Vec<ContextEntry>,
    pub total_tokens: u32,
}

/// How entries are dropped once the window exceeds its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop oldest entries first.
    #[default]
    Truncation,
    /// Drop the lowest-scoring entry, where score grows with recency and
    /// with the presence of configured named terms.
    Importance,
    /// Collapse the oldest entries into one condensed entry through the
    /// translation provider's summarize capability. Falls back to
    /// truncation when no capable provider is available.
    Summarization,
}

/// When appends become visible in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Every segment commits synchronously.
    #[default]
    Immediate,
    /// Commit every `every_n` segments, or after `max_interval_ms` since
    /// the last commit, whichever comes first.
    Batch { every_n: usize, max_interval_ms: u64 },
    /// Immediate while the observed append rate stays below the provider
    /// rate hint, batching when it exceeds it.
    Adaptive,
}

/// Context window tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard token budget for one speaker's window.
    pub max_tokens: u32,
    /// Hard entry cap for one speaker's window.
    pub max_entries: usize,
    /// Fraction of `max_tokens` that triggers eviction, in `(0, 1]`.
    pub compression_threshold: f32,
    pub eviction_policy: EvictionPolicy,
    pub update_mode: UpdateMode,
    /// Terms that raise an entry's importance score.
    pub named_terms: Vec<String>,
    /// Score multiplier applied to entries containing a named term.
    pub importance_weight: f32,
    /// Number of oldest entries collapsed per summarization pass.
    pub summarize_batch: usize,
    /// Provider rate used by the adaptive update mode to decide between
    /// immediate and batched appends, in calls per minute.
    pub rate_hint_per_minute: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: defaults::CONTEXT_MAX_TOKENS,
            max_entries: defaults::CONTEXT_MAX_ENTRIES,
            compression_threshold: defaults::COMPRESSION_THRESHOLD,
            eviction_policy: EvictionPolicy::default(),
            update_mode: UpdateMode::default(),
            named_terms: Vec::new(),
            importance_weight: 3.0,
            summarize_batch: 4,
            rate_hint_per_minute: defaults::RATE_LIMIT_PER_MINUTE,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(crate::error::PipelineError::InvalidConfiguration {
                key: "max_tokens".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.max_entries == 0 {
            return Err(crate::error::PipelineError::InvalidConfiguration {
                key: "max_entries".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(self.compression_threshold > 0.0 && self.compression_threshold <= 1.0) {
            return Err(crate::error::PipelineError::InvalidConfiguration {
                key: "compression_threshold".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

/// Bounded context window for a single speaker.
pub struct ContextBuffer {
    config: ContextConfig,
    entries: VecDeque<ContextEntry>,
    total_tokens: u32,
    pending: Vec<ContextEntry>,
    last_commit_ms: u64,
    last_append_ms: u64,
    summarizer: Option<Arc<dyn TranslationProvider>>,
    warned_no_summarizer: bool,
}

impl ContextBuffer {
    pub fn new(config: ContextConfig, summarizer: Option<Arc<dyn TranslationProvider>>) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            total_tokens: 0,
            pending: Vec::new(),
            last_commit_ms: 0,
            last_append_ms: 0,
            summarizer,
            warned_no_summarizer: false,
        }
    }

    /// Adds one utterance pair. Visibility in snapshots depends on the
    /// update mode; ordering within the window is always append order.
    pub async fn append(
        &mut self,
        source_text: &str,
        translated_text: &str,
        timestamp_ms: u64,
    ) -> Result<()> {
        let entry = ContextEntry::new(source_text, translated_text, timestamp_ms);
        if entry.token_cost > self.config.max_tokens {
            warn!(
                cost = entry.token_cost,
                budget = self.config.max_tokens,
                "context entry exceeds the whole token budget, dropping it"
            );
            return Ok(());
        }

        let batched = match self.config.update_mode {
            UpdateMode::Immediate => false,
            UpdateMode::Batch { .. } => true,
            UpdateMode::Adaptive => {
                // Appends arriving faster than the provider rate are batched
                // to keep snapshot churn below the call rate.
                let interval_ms = timestamp_ms.saturating_sub(self.last_append_ms);
                let limit_interval_ms = 60_000 / self.config.rate_hint_per_minute.max(1) as u64;
                self.last_append_ms != 0 && interval_ms < limit_interval_ms
            }
        };
        self.last_append_ms = timestamp_ms;

        if batched {
            self.pending.push(entry);
            let (every_n, max_interval_ms) = match self.config.update_mode {
                UpdateMode::Batch {
                    every_n,
                    max_interval_ms,
                } => (every_n, max_interval_ms),
                _ => (3, 10_000),
            };
            let due = self.pending.len() >= every_n.max(1)
                || timestamp_ms.saturating_sub(self.last_commit_ms) >= max_interval_ms;
            if due {
                self.commit_pending(timestamp_ms).await?;
            }
            return Ok(());
        }

        self.commit(entry).await?;
        self.last_commit_ms = timestamp_ms;
        Ok(())
    }

    /// Commits everything still pending. Called at drain.
    pub async fn flush(&mut self) -> Result<()> {
        let timestamp_ms = self.last_append_ms;
        self.commit_pending(timestamp_ms).await
    }

    /// Returns a copy of the committed window, oldest entry first.
    pub fn snapshot(&self) -> ContextWindow {
        ContextWindow {
            entries: self.entries.iter().cloned().collect(),
            total_tokens: self.total_tokens,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }

    async fn commit_pending(&mut self, timestamp_ms: u64) -> Result<()> {
        for entry in std::mem::take(&mut self.pending) {
            self.commit(entry).await?;
        }
        self.last_commit_ms = timestamp_ms;
        Ok(())
    }

    async fn commit(&mut self, entry: ContextEntry) -> Result<()> {
        self.total_tokens += entry.token_cost;
        self.entries.push_back(entry);
        self.enforce_budget().await
    }

    async fn enforce_budget(&mut self) -> Result<()> {
        let floor = (self.config.max_tokens as f32 * self.config.compression_threshold) as u32;
        while self.entries.len() > 1
            && (self.total_tokens > floor || self.entries.len() > self.config.max_entries)
        {
            match self.config.eviction_policy {
                EvictionPolicy::Truncation => self.evict_oldest(),
                EvictionPolicy::Importance => self.evict_least_important(),
                EvictionPolicy::Summarization => self.summarize_oldest().await,
            }
        }
        Ok(())
    }

    fn evict_oldest(&mut self) {
        if let Some(evicted) = self.entries.pop_front() {
            self.total_tokens -= evicted.token_cost;
            debug!(cost = evicted.token_cost, "evicted oldest context entry");
        }
    }

    fn evict_least_important(&mut self) {
        let named_terms = &self.config.named_terms;
        let lowest = self
            .entries
            .iter()
            .enumerate()
            .map(|(rank, entry)| {
                // Recency rank: newest entries score highest.
                let mut score = (rank + 1) as f32;
                if named_terms
                    .iter()
                    .any(|term| entry.source_text.contains(term.as_str()))
                {
                    score *= self.config.importance_weight;
                }
                (rank, score)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(rank, _)| rank);
        if let Some(rank) = lowest
            && let Some(evicted) = self.entries.remove(rank)
        {
            self.total_tokens -= evicted.token_cost;
        }
    }

    async fn summarize_oldest(&mut self) {
        let capable = self
            .summarizer
            .as_ref()
            .filter(|provider| provider.supports_summarization())
            .cloned();
        let Some(provider) = capable else {
            if !self.warned_no_summarizer {
                warn!("no summarization-capable provider, falling back to truncation");
                self.warned_no_summarizer = true;
            }
            self.evict_oldest();
            return;
        };

        let take = self.config.summarize_batch.max(2).min(self.entries.len());
        let oldest: Vec<ContextEntry> = self.entries.drain(..take).collect();
        for entry in &oldest {
            self.total_tokens -= entry.token_cost;
        }
        match provider.summarize(&oldest).await {
            Ok(summary) => {
                let timestamp_ms = oldest.last().map(|e| e.timestamp_ms).unwrap_or(0);
                let condensed = ContextEntry::new(&summary, &summary, timestamp_ms);
                self.total_tokens += condensed.token_cost;
                self.entries.push_front(condensed);
            }
            Err(error) => {
                // Entries are already dropped; degrade to plain truncation.
                warn!(%error, "summarization failed, truncated instead");
            }
        }
    }
}

/// Holds one isolated context buffer per opaque speaker key.
pub struct ContextBufferManager {
    config: ContextConfig,
    summarizer: Option<Arc<dyn TranslationProvider>>,
    buffers: HashMap<String, ContextBuffer>,
}

impl ContextBufferManager {
    pub fn new(config: ContextConfig, summarizer: Option<Arc<dyn TranslationProvider>>) -> Self {
        Self {
            config,
            summarizer,
            buffers: HashMap::new(),
        }
    }

    /// Replaces the tuning for buffers created from now on and for
    /// existing buffers' budget enforcement.
    pub fn apply_config(&mut self, config: ContextConfig) {
        for buffer in self.buffers.values_mut() {
            buffer.config = config.clone();
        }
        self.config = config;
    }

    pub async fn append(
        &mut self,
        speaker: &str,
        source_text: &str,
        translated_text: &str,
        timestamp_ms: u64,
    ) -> Result<()> {
        self.buffer_mut(speaker)
            .append(source_text, translated_text, timestamp_ms)
            .await
    }

    /// Point-in-time window for the speaker; empty if none exists yet.
    pub fn snapshot(&self, speaker: &str) -> ContextWindow {
        self.buffers
            .get(speaker)
            .map(|buffer| buffer.snapshot())
            .unwrap_or_default()
    }

    pub async fn flush(&mut self) -> Result<()> {
        for buffer in self.buffers.values_mut() {
            buffer.flush().await?;
        }
        Ok(())
    }

    fn buffer_mut(&mut self, speaker: &str) -> &mut ContextBuffer {
        self.buffers.entry(speaker.to_string()).or_insert_with(|| {
            ContextBuffer::new(self.config.clone(), self.summarizer.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::translation::MockTranslator;

    fn config(max_tokens: u32, max_entries: usize) -> ContextConfig {
        ContextConfig {
            max_tokens,
            max_entries,
            compression_threshold: 0.8,
            ..Default::default()
        }
    }

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // CJK counts characters, not bytes.
        assert_eq!(estimate_tokens("こんにちは"), 2);
    }

    #[tokio::test]
    async fn test_append_and_snapshot_in_order() {
        let mut buffer = ContextBuffer::new(config(1000, 10), None);
        buffer.append("first", "un", 1).await.unwrap();
        buffer.append("second", "deux", 2).await.unwrap();

        let window = buffer.snapshot();
        assert_eq!(window.entries.len(), 2);
        assert_eq!(window.entries[0].source_text, "first");
        assert_eq!(window.entries[1].source_text, "second");
        assert_eq!(window.total_tokens, buffer.total_tokens());
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_appends() {
        let mut buffer = ContextBuffer::new(config(1000, 10), None);
        buffer.append("first", "un", 1).await.unwrap();
        let window = buffer.snapshot();
        buffer.append("second", "deux", 2).await.unwrap();
        assert_eq!(window.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_truncation_keeps_budget() {
        let mut buffer = ContextBuffer::new(config(20, 100), None);
        for i in 0..20 {
            let text = format!("utterance number {i} with several words");
            buffer.append(&text, &text, i).await.unwrap();
            assert!(buffer.total_tokens() <= 20);
        }
        // Oldest entries were dropped.
        let window = buffer.snapshot();
        assert!(window.entries[0].timestamp_ms > 0);
    }

    #[tokio::test]
    async fn test_entry_cap_enforced() {
        let mut buffer = ContextBuffer::new(config(10_000, 3), None);
        for i in 0..10 {
            buffer.append("short", "kurz", i).await.unwrap();
        }
        assert!(buffer.len() <= 3);
    }

    #[tokio::test]
    async fn test_oversized_entry_is_dropped() {
        let mut buffer = ContextBuffer::new(config(5, 10), None);
        let huge = "x".repeat(400);
        buffer.append(&huge, &huge, 1).await.unwrap();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_importance_keeps_named_terms() {
        let mut cfg = config(16, 100);
        cfg.eviction_policy = EvictionPolicy::Importance;
        cfg.named_terms = vec!["Tanaka".to_string()];
        let mut buffer = ContextBuffer::new(cfg, None);

        buffer.append("Tanaka joined", "entry a", 1).await.unwrap();
        buffer.append("weather talk", "entry b", 2).await.unwrap();
        buffer.append("lunch plans", "entry c", 3).await.unwrap();
        buffer.append("budget review", "entry d", 4).await.unwrap();

        let window = buffer.snapshot();
        assert!(
            window
                .entries
                .iter()
                .any(|entry| entry.source_text.contains("Tanaka")),
            "named-term entry should outlive plain older entries"
        );
    }

    #[tokio::test]
    async fn test_summarization_collapses_oldest() {
        let mut cfg = config(20, 100);
        cfg.eviction_policy = EvictionPolicy::Summarization;
        cfg.summarize_batch = 2;
        let provider: Arc<dyn TranslationProvider> =
            Arc::new(MockTranslator::new("sum").with_summarization());
        let mut buffer = ContextBuffer::new(cfg, Some(provider));

        for i in 0..8 {
            let text = format!("utterance number {i} in a meeting");
            buffer.append(&text, &text, i).await.unwrap();
        }
        let window = buffer.snapshot();
        assert!(
            window
                .entries
                .iter()
                .any(|entry| entry.source_text.starts_with("summary of")),
            "window should contain a condensed entry: {window:?}"
        );
        assert!(buffer.total_tokens() <= 20);
    }

    #[tokio::test]
    async fn test_summarization_without_capability_truncates() {
        let mut cfg = config(20, 100);
        cfg.eviction_policy = EvictionPolicy::Summarization;
        let provider: Arc<dyn TranslationProvider> = Arc::new(MockTranslator::new("plain"));
        let mut buffer = ContextBuffer::new(cfg, Some(provider));

        for i in 0..8 {
            let text = format!("utterance number {i} in a meeting");
            buffer.append(&text, &text, i).await.unwrap();
        }
        assert!(buffer.total_tokens() <= 20);
    }

    #[tokio::test]
    async fn test_batch_mode_commits_every_n() {
        let mut cfg = config(1000, 100);
        cfg.update_mode = UpdateMode::Batch {
            every_n: 3,
            max_interval_ms: 60_000,
        };
        let mut buffer = ContextBuffer::new(cfg, None);

        buffer.append("one", "1", 1).await.unwrap();
        buffer.append("two", "2", 2).await.unwrap();
        assert_eq!(buffer.snapshot().entries.len(), 0);
        buffer.append("three", "3", 3).await.unwrap();
        assert_eq!(buffer.snapshot().entries.len(), 3);
    }

    #[tokio::test]
    async fn test_batch_mode_flush_commits_leftovers() {
        let mut cfg = config(1000, 100);
        cfg.update_mode = UpdateMode::Batch {
            every_n: 5,
            max_interval_ms: 60_000,
        };
        let mut buffer = ContextBuffer::new(cfg, None);
        buffer.append("one", "1", 1).await.unwrap();
        assert!(buffer.is_empty());
        buffer.flush().await.unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_manager_isolates_speakers() {
        let mut manager = ContextBufferManager::new(config(1000, 10), None);
        manager.append("alice", "hello", "bonjour", 1).await.unwrap();
        manager.append("bob", "bye", "tschüss", 2).await.unwrap();

        assert_eq!(manager.snapshot("alice").entries.len(), 1);
        assert_eq!(manager.snapshot("bob").entries.len(), 1);
        assert_eq!(
            manager.snapshot("alice").entries[0].translated_text,
            "bonjour"
        );
        assert!(manager.snapshot("carol").entries.is_empty());
    }
}
