use crate::cancellation::CancellationScope;
use crate::error::{ErrorKind, Fault, WorkflowError};
use crate::transport::{decode_outcome, DispatchEnvelope, WorkerTransport};
use crate::types::{EvaluationId, EvaluationRecord, EvaluationStatus, JobId, WorkerId};
use crate::workflow::Workflow;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where a dispatched evaluation sits in its job's tree
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest {
    pub job_id: JobId,
    pub parent: Option<EvaluationId>,
}

impl DispatchRequest {
    pub fn root(job_id: JobId) -> Self {
        Self {
            job_id,
            parent: None,
        }
    }

    pub fn child(job_id: JobId, parent: EvaluationId) -> Self {
        Self {
            job_id,
            parent: Some(parent),
        }
    }
}

/// Places evaluations on workers and tracks each one until it settles
pub struct Scheduler {
    transport: Arc<dyn WorkerTransport>,
    workers: Vec<WorkerId>,
    // Outstanding evaluations per worker, parallel to `workers`
    load: Vec<AtomicUsize>,
    cursor: AtomicUsize,
    evaluations: RwLock<HashMap<EvaluationId, EvaluationRecord>>,
}

impl Scheduler {
    pub fn new(transport: Arc<dyn WorkerTransport>, workers: Vec<WorkerId>) -> Self {
        let load = workers.iter().map(|_| AtomicUsize::new(0)).collect();
        Self {
            transport,
            workers,
            load,
            cursor: AtomicUsize::new(0),
            evaluations: RwLock::new(HashMap::new()),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> &[WorkerId] {
        &self.workers
    }

    /// Evaluations currently placed on `worker`
    pub fn outstanding(&self, worker: &WorkerId) -> usize {
        self.workers
            .iter()
            .position(|w| w == worker)
            .map(|i| self.load[i].load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub async fn evaluation(&self, id: &EvaluationId) -> Option<EvaluationRecord> {
        self.evaluations.read().await.get(id).cloned()
    }

    /// Every evaluation recorded for a job, oldest first
    pub async fn evaluations_of(&self, job_id: &JobId) -> Vec<EvaluationRecord> {
        let mut records: Vec<_> = self
            .evaluations
            .read()
            .await
            .values()
            .filter(|r| &r.job_id == job_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    pub async fn children_of(&self, parent: &EvaluationId) -> Vec<EvaluationRecord> {
        let mut records: Vec<_> = self
            .evaluations
            .read()
            .await
            .values()
            .filter(|r| r.parent.as_ref() == Some(parent))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Forget the evaluation records of a finished job
    pub async fn prune_job(&self, job_id: &JobId) -> usize {
        let mut evaluations = self.evaluations.write().await;
        let before = evaluations.len();
        evaluations.retain(|_, r| &r.job_id != job_id);
        before - evaluations.len()
    }

    /// Run `workflow` on a worker and wait for its outcome.
    ///
    /// The evaluation is recorded as `Running` before it is enqueued and
    /// moves to exactly one terminal status once the worker replies.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        workflow: &Workflow,
        scope: CancellationScope,
    ) -> Result<Value, Fault> {
        let payload = workflow.encode()?;
        let slot = self.acquire().ok_or_else(|| {
            Fault::Error(WorkflowError::new(
                ErrorKind::Transport,
                "no workers available",
            ))
        })?;
        let worker = self.workers[slot.index].clone();

        let evaluation_id = EvaluationId::new();
        self.evaluations.write().await.insert(
            evaluation_id,
            EvaluationRecord {
                id: evaluation_id,
                job_id: request.job_id,
                parent: request.parent,
                worker: worker.clone(),
                status: EvaluationStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
            },
        );

        tracing::debug!(
            job_id = %request.job_id,
            evaluation_id = %evaluation_id,
            worker = %worker,
            "dispatching evaluation"
        );

        let envelope = DispatchEnvelope {
            evaluation_id,
            job_id: request.job_id,
            workflow: Bytes::from(payload),
        };
        let outcome = match self.transport.dispatch(&worker, envelope, scope).await {
            Ok(reply) => decode_outcome(&reply),
            Err(e) => {
                tracing::error!(worker = %worker, "dispatch failed: {}", e);
                Err(Fault::Error(WorkflowError::new(
                    ErrorKind::Transport,
                    e.to_string(),
                )))
            }
        };
        drop(slot);

        let status = match &outcome {
            Ok(_) => EvaluationStatus::Completed,
            Err(Fault::Cancelled) => EvaluationStatus::Cancelled,
            Err(Fault::Error(_)) => EvaluationStatus::Failed,
        };
        if let Some(record) = self.evaluations.write().await.get_mut(&evaluation_id) {
            record.finish(status);
        }

        tracing::debug!(
            evaluation_id = %evaluation_id,
            status = ?status,
            "evaluation settled"
        );

        outcome
    }

    /// Reserve the least-loaded worker, rotating among ties
    fn acquire(&self) -> Option<Slot<'_>> {
        let count = self.workers.len();
        if count == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % count;
        let index = (0..count)
            .map(|offset| (start + offset) % count)
            .min_by_key(|&i| self.load[i].load(Ordering::SeqCst))?;

        self.load[index].fetch_add(1, Ordering::SeqCst);
        Some(Slot {
            counter: &self.load[index],
            index,
        })
    }
}

/// A reserved unit of worker load, released on drop
struct Slot<'a> {
    counter: &'a AtomicUsize,
    index: usize,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{encode_outcome, LocalTransport};
    use serde_json::json;

    /// Workers that echo the encoded workflow's `Return` value after
    /// waiting for a go signal
    fn echo_scheduler(workers: usize, gate: Arc<tokio::sync::Notify>) -> Arc<Scheduler> {
        let ids: Vec<_> = (0..workers).map(WorkerId::indexed).collect();
        let (transport, inboxes) = LocalTransport::new(&ids);

        for (_, mut inbox) in inboxes {
            let gate = gate.clone();
            tokio::spawn(async move {
                while let Some(delivery) = inbox.recv().await {
                    let gate = gate.clone();
                    tokio::spawn(async move {
                        gate.notified().await;
                        let outcome = match Workflow::decode(&delivery.envelope.workflow) {
                            Ok(Workflow::Return { value }) => Ok(value),
                            _ => Err(Fault::Cancelled),
                        };
                        let _ = delivery.reply.send(encode_outcome(&outcome));
                    });
                }
            });
        }

        Arc::new(Scheduler::new(Arc::new(transport), ids))
    }

    #[tokio::test]
    async fn test_dispatch_records_evaluation() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let scheduler = echo_scheduler(2, gate.clone());
        let job_id = JobId::new();

        let task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .dispatch(
                        DispatchRequest::root(job_id),
                        &Workflow::value(json!(5)),
                        CancellationScope::new(),
                    )
                    .await
            })
        };

        // Wait until the evaluation is in flight
        while scheduler.evaluations_of(&job_id).await.is_empty() {
            tokio::task::yield_now().await;
        }
        let running = scheduler.evaluations_of(&job_id).await;
        assert_eq!(running[0].status, EvaluationStatus::Running);

        gate.notify_waiters();
        while !task.is_finished() {
            gate.notify_waiters();
            tokio::task::yield_now().await;
        }
        assert_eq!(task.await.unwrap(), Ok(json!(5)));

        let settled = scheduler.evaluations_of(&job_id).await;
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].status, EvaluationStatus::Completed);
        assert_eq!(scheduler.prune_job(&job_id).await, 1);
    }

    #[tokio::test]
    async fn test_least_loaded_placement() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let scheduler = echo_scheduler(3, gate.clone());
        let job_id = JobId::new();

        let mut tasks = Vec::new();
        for i in 0..6 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .dispatch(
                        DispatchRequest::root(job_id),
                        &Workflow::value(json!(i)),
                        CancellationScope::new(),
                    )
                    .await
            }));
        }

        while scheduler.evaluations_of(&job_id).await.len() < 6 {
            tokio::task::yield_now().await;
        }
        for worker in scheduler.worker_ids() {
            assert_eq!(scheduler.outstanding(worker), 2);
        }

        while tasks.iter().any(|t| !t.is_finished()) {
            gate.notify_waiters();
            tokio::task::yield_now().await;
        }
        for worker in scheduler.worker_ids() {
            assert_eq!(scheduler.outstanding(worker), 0);
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_workers_fails() {
        let (transport, _) = LocalTransport::new(&[]);
        let scheduler = Scheduler::new(Arc::new(transport), Vec::new());

        let outcome = scheduler
            .dispatch(
                DispatchRequest::root(JobId::new()),
                &Workflow::unit(),
                CancellationScope::new(),
            )
            .await;
        assert!(matches!(
            outcome,
            Err(Fault::Error(e)) if e.kind == ErrorKind::Transport
        ));
    }
}
