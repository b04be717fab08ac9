//! Output sinks for finished translation records.

use crate::error::{PipelineError, Result};
use crate::pipeline::frame::TranslationRecord;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Receives translation records strictly in sequence order.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Appends one record. Transient failures may be retried by the caller
    /// with the same record.
    async fn append(&self, record: &TranslationRecord) -> Result<()>;

    /// Name for logging and error reporting.
    fn name(&self) -> &str;
}

/// In-memory sink for tests; collects every appended record.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TranslationRecord>>>,
    fail_first: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sink to reject the first `n` appends, then accept.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Returns a copy of everything appended so far, in append order.
    pub fn records(&self) -> Vec<TranslationRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn append(&self, record: &TranslationRecord) -> Result<()> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::Sink {
                message: "mock sink failure".to_string(),
            });
        }
        self.records
            .lock()
            .map_err(|_| PipelineError::Sink {
                message: "sink poisoned".to_string(),
            })?
            .push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Sink that appends records as JSON Lines to a writer.
pub struct JsonlSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    /// Creates a sink over any writer.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Creates a sink appending to a file, creating it if absent.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

#[async_trait]
impl OutputSink for JsonlSink {
    async fn append(&self, record: &TranslationRecord) -> Result<()> {
        let line = serde_json::to_string(record).map_err(|e| PipelineError::Sink {
            message: format!("Failed to serialize record: {}", e),
        })?;
        let mut writer = self.writer.lock().map_err(|_| PipelineError::Sink {
            message: "sink poisoned".to_string(),
        })?;
        writeln!(writer, "{}", line).map_err(|e| PipelineError::Sink {
            message: format!("Failed to write record: {}", e),
        })?;
        writer.flush().map_err(|e| PipelineError::Sink {
            message: format!("Failed to flush sink: {}", e),
        })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
