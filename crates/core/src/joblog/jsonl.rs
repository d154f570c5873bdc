use super::{LogEntry, LogError, LogSink};
use crate::types::JobId;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Log sink writing one JSON Lines file per job
pub struct JsonlLogSink {
    base_path: PathBuf,
    // Serializes appends so lines from concurrent workers never interleave
    write_lock: Mutex<()>,
}

impl JsonlLogSink {
    pub fn new(base_path: PathBuf) -> Result<Self, LogError> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Format: <base>/<job_id>.jsonl
    fn log_path(&self, job_id: &JobId) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", job_id))
    }
}

#[async_trait::async_trait]
impl LogSink for JsonlLogSink {
    async fn append(&self, entry: &LogEntry) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(&entry.job_id))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, job_id: &JobId) -> Result<Vec<LogEntry>, LogError> {
        let path = self.log_path(job_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(LogError::from))
            .collect()
    }
}
