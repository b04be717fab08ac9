//! Terminal station: ordered delivery to the output sink.

use crate::error::{PipelineError, Result};
use crate::pipeline::frame::TranslationRecord;
use crate::providers::sink::OutputSink;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Delivery tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Redelivery attempts after a failed append.
    pub sink_retries: u32,
    /// Delay between redelivery attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            sink_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

/// Receives ordered records and appends them to the sink, retrying
/// transient failures a bounded number of times. A persistent sink
/// failure is surfaced, never retried indefinitely.
pub struct Sequencer {
    config: SequencerConfig,
    sink: Arc<dyn OutputSink>,
}

impl Sequencer {
    pub fn new(config: SequencerConfig, sink: Arc<dyn OutputSink>) -> Self {
        Self { config, sink }
    }

    pub async fn run(self, mut input: mpsc::Receiver<TranslationRecord>) -> Result<()> {
        let mut delivered = 0u64;
        let mut last_sequence: Option<u64> = None;

        while let Some(record) = input.recv().await {
            if let Some(last) = last_sequence
                && record.sequence <= last
            {
                warn!(
                    sequence = record.sequence,
                    last, "record arrived out of order at the sink"
                );
            }
            last_sequence = Some(record.sequence);

            self.deliver(&record).await?;
            delivered += 1;
        }

        info!(delivered, sink = self.sink.name(), "output stream complete");
        Ok(())
    }

    async fn deliver(&self, record: &TranslationRecord) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.sink.append(record).await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < self.config.sink_retries => {
                    attempt += 1;
                    warn!(
                        sequence = record.sequence,
                        attempt,
                        %error,
                        "sink append failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(error) => {
                    return Err(PipelineError::Sink {
                        message: format!(
                            "append of record {} failed after {} attempts: {}",
                            record.sequence,
                            attempt + 1,
                            error
                        ),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::sink::MemorySink;

    fn record(sequence: u64) -> TranslationRecord {
        TranslationRecord {
            sequence,
            speaker: "alice".to_string(),
            timestamp_ms: sequence,
            source_text: format!("source {sequence}"),
            translated_text: format!("translated {sequence}"),
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            translation_failed: false,
        }
    }

    fn config() -> SequencerConfig {
        SequencerConfig {
            sink_retries: 2,
            retry_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_delivers_all_records_in_order() {
        let sink = MemorySink::new();
        let sequencer = Sequencer::new(config(), Arc::new(sink.clone()));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(sequencer.run(rx));

        for i in 0..5 {
            tx.send(record(i)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap().unwrap();

        let sequences: Vec<u64> = sink.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_transient_sink_failure_is_retried() {
        let sink = MemorySink::new().with_transient_failures(2);
        let sequencer = Sequencer::new(config(), Arc::new(sink.clone()));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(sequencer.run(rx));

        tx.send(record(0)).await.unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_sink_failure_is_surfaced() {
        let sink = MemorySink::new().with_transient_failures(10);
        let sequencer = Sequencer::new(config(), Arc::new(sink.clone()));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(sequencer.run(rx));

        tx.send(record(0)).await.unwrap();
        drop(tx);
        let result = task.await.unwrap();

        match result {
            Err(PipelineError::Sink { message }) => {
                assert!(message.contains("after 3 attempts"), "{message}");
            }
            other => panic!("expected Sink error, got {other:?}"),
        }
        assert!(sink.records().is_empty());
    }
}
