use super::{LogEntry, LogError, LogSink};
use crate::types::JobId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process log sink
#[derive(Default)]
pub struct MemoryLogSink {
    streams: RwLock<HashMap<JobId, Vec<LogEntry>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LogSink for MemoryLogSink {
    async fn append(&self, entry: &LogEntry) -> Result<(), LogError> {
        self.streams
            .write()
            .await
            .entry(entry.job_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn read(&self, job_id: &JobId) -> Result<Vec<LogEntry>, LogError> {
        Ok(self
            .streams
            .read()
            .await
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }
}
