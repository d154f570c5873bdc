//! Error types shared by the interpreter, the combinators and the runtime.
//!
//! Errors raised inside a workflow must survive a trip across a worker
//! boundary, so they are plain serializable data ([`WorkflowError`]) rather
//! than native error objects. Cancellation is not an error: it travels as
//! [`Fault::Cancelled`] and is never handed to a `TryWith` handler.

use crate::joblog::LogError;
use crate::store::StoreError;
use crate::transport::TransportError;
use crate::types::JobId;
use serde::{Deserialize, Serialize};

/// Category of a [`WorkflowError`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Raised by `Raise` or by a failing external operation
    Evaluation,
    /// I/O failure reading or writing a distributed primitive
    Store,
    /// Reference to a freed or non-existent primitive
    NotFound,
    /// A continuation, handler or function name missing from the registry
    UnknownFunction,
    /// A value could not be encoded or decoded
    Serialization,
    /// A dispatch could not reach its worker
    Transport,
    /// Application-defined error tag
    User(String),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Evaluation => write!(f, "evaluation"),
            ErrorKind::Store => write!(f, "store"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::UnknownFunction => write!(f, "unknown_function"),
            ErrorKind::Serialization => write!(f, "serialization"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::User(tag) => write!(f, "{}", tag),
        }
    }
}

/// Structured, serializable error carried through workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Evaluation, message)
    }

    pub fn user(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User(tag.into()), message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownFunction,
            format!("function '{}' is not registered", name),
        )
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Serialization, err.to_string())
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::not_found(format!("entry not found: {}", key)),
            StoreError::Serialization(e) => Self::serialization(e),
            other => Self::store(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

/// Outcome of an evaluation that did not produce a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fault", content = "error", rename_all = "snake_case")]
pub enum Fault {
    /// The evaluation failed and the error may be handled by a `TryWith`
    Error(WorkflowError),
    /// The evaluation's cancellation scope was cancelled
    Cancelled,
}

impl Fault {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Fault::Cancelled)
    }
}

impl From<WorkflowError> for Fault {
    fn from(err: WorkflowError) -> Self {
        Fault::Error(err)
    }
}

/// Errors surfaced by the top-level runtime API
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("workflow failed with {0}")]
    Workflow(WorkflowError),

    #[error("job {0} was cancelled")]
    Cancelled(JobId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {job_id} is not running")]
    JobNotRunning { job_id: JobId },

    #[error("job {job_id} is still running")]
    JobRunning { job_id: JobId },

    #[error("job {0} aborted: {1}")]
    Aborted(JobId, String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("job log error: {0}")]
    Log(#[from] LogError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to decode result: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let err = WorkflowError::user("InvalidInput", "x must be positive");
        assert_eq!(err.to_string(), "InvalidInput: x must be positive");
    }

    #[test]
    fn test_store_error_maps_to_kind() {
        let err: WorkflowError = StoreError::NotFound("stratus/abc".to_string()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err: WorkflowError = StoreError::Backend("disk full".to_string()).into();
        assert_eq!(err.kind, ErrorKind::Store);
    }

    #[test]
    fn test_fault_crosses_json() {
        let fault = Fault::Error(
            WorkflowError::evaluation("boom").with_payload(serde_json::json!({"step": 3})),
        );
        let bytes = serde_json::to_vec(&fault).unwrap();
        let decoded: Fault = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, fault);

        let cancelled: Fault =
            serde_json::from_slice(&serde_json::to_vec(&Fault::Cancelled).unwrap()).unwrap();
        assert!(cancelled.is_cancelled());
    }
}
