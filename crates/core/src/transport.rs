//! Worker transport: how an encoded evaluation reaches a worker and how its
//! encoded outcome comes back.
//!
//! Only bytes cross the transport. The cancellation scope travels beside the
//! envelope as the out-of-band control channel; a networked transport would
//! forward `cancel()` as a control message to the remote worker.

use crate::cancellation::CancellationScope;
use crate::error::{Fault, WorkflowError};
use crate::types::{EvaluationId, JobId, WorkerId};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("worker {0} is not reachable")]
    WorkerUnavailable(WorkerId),

    #[error("worker {0} dropped the reply")]
    ReplyDropped(WorkerId),
}

/// One unit of work addressed to a worker
#[derive(Debug, Clone)]
pub struct DispatchEnvelope {
    pub evaluation_id: EvaluationId,
    pub job_id: JobId,
    /// Encoded [`Workflow`](crate::workflow::Workflow)
    pub workflow: Bytes,
}

/// An envelope as received by a worker, with its reply channel
#[derive(Debug)]
pub struct Delivery {
    pub envelope: DispatchEnvelope,
    pub scope: CancellationScope,
    pub reply: oneshot::Sender<Bytes>,
}

/// Enqueue work on a worker and await its encoded outcome
#[async_trait::async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn dispatch(
        &self,
        worker: &WorkerId,
        envelope: DispatchEnvelope,
        scope: CancellationScope,
    ) -> Result<Bytes, TransportError>;
}

/// Transport for workers hosted in the current process, one channel each
pub struct LocalTransport {
    inboxes: HashMap<WorkerId, mpsc::UnboundedSender<Delivery>>,
}

pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

impl LocalTransport {
    pub fn new(workers: &[WorkerId]) -> (Self, Vec<(WorkerId, Inbox)>) {
        let mut inboxes = HashMap::new();
        let mut receivers = Vec::with_capacity(workers.len());

        for worker in workers {
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.insert(worker.clone(), tx);
            receivers.push((worker.clone(), rx));
        }

        (Self { inboxes }, receivers)
    }
}

#[async_trait::async_trait]
impl WorkerTransport for LocalTransport {
    async fn dispatch(
        &self,
        worker: &WorkerId,
        envelope: DispatchEnvelope,
        scope: CancellationScope,
    ) -> Result<Bytes, TransportError> {
        let inbox = self
            .inboxes
            .get(worker)
            .ok_or_else(|| TransportError::WorkerUnavailable(worker.clone()))?;

        let (reply, response) = oneshot::channel();
        inbox
            .send(Delivery {
                envelope,
                scope,
                reply,
            })
            .map_err(|_| TransportError::WorkerUnavailable(worker.clone()))?;

        response
            .await
            .map_err(|_| TransportError::ReplyDropped(worker.clone()))
    }
}

/// Encode an evaluation outcome for the reply channel
pub fn encode_outcome(outcome: &Result<Value, Fault>) -> Bytes {
    match serde_json::to_vec(outcome) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            let fallback: Result<Value, Fault> = Err(Fault::Error(WorkflowError::serialization(e)));
            // A Fault holding only strings always encodes
            Bytes::from(serde_json::to_vec(&fallback).unwrap_or_default())
        }
    }
}

pub fn decode_outcome(bytes: &[u8]) -> Result<Value, Fault> {
    match serde_json::from_slice::<Result<Value, Fault>>(bytes) {
        Ok(outcome) => outcome,
        Err(e) => Err(Fault::Error(WorkflowError::serialization(e))),
    }
}
