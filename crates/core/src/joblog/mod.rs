pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlLogSink;
pub use memory::MemoryLogSink;

use crate::types::{JobId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Errors raised by log sinks
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log sink unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One line of a job's log stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: JobId,
    pub worker: WorkerId,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(job_id: JobId, worker: WorkerId, message: impl Into<String>) -> Self {
        Self {
            job_id,
            worker,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Append-only destination for job log streams
#[async_trait::async_trait]
pub trait LogSink: Send + Sync {
    /// Append an entry to its job's stream
    async fn append(&self, entry: &LogEntry) -> Result<(), LogError>;

    /// Read a job's stream in append order
    async fn read(&self, job_id: &JobId) -> Result<Vec<LogEntry>, LogError>;
}

/// Delivery policy for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

/// Delivers log entries with bounded retry. An entry that cannot be
/// delivered is dropped with a local warning; logging never fails or stalls
/// an evaluation.
pub struct JobLogger {
    sink: Arc<dyn LogSink>,
    policy: LogPolicy,
}

impl JobLogger {
    pub fn new(sink: Arc<dyn LogSink>, policy: LogPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Deliver `entry`, returning whether it reached the sink
    pub async fn log(&self, entry: LogEntry) -> bool {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let result = tokio::time::timeout(self.policy.attempt_timeout, self.sink.append(&entry)).await;
            let error = match result {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.policy.attempt_timeout),
            };

            if attempt < attempts {
                let backoff = self.policy.backoff * 2u32.pow(attempt - 1);
                tracing::debug!(
                    job_id = %entry.job_id,
                    attempt,
                    error = %error,
                    "log delivery failed, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
            } else {
                tracing::warn!(
                    job_id = %entry.job_id,
                    attempts,
                    error = %error,
                    "dropping log entry: {}",
                    entry.message
                );
            }
        }

        false
    }

    pub async fn read(&self, job_id: &JobId) -> Result<Vec<LogEntry>, LogError> {
        self.sink.read(job_id).await
    }
}

/// Expand `{}` placeholders in order. Strings are inserted verbatim, other
/// values as JSON; surplus placeholders stay as-is and surplus arguments
/// are appended.
pub fn format_message(format: &str, args: &[serde_json::Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut rest = format;

    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(&render(arg)),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);

    for arg in args {
        out.push(' ');
        out.push_str(&render(arg));
    }
    out
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
