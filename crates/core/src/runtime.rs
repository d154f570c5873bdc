use crate::cancellation::CancellationScope;
use crate::config::{LogBackend, RuntimeConfig, StoreBackend};
use crate::error::{Fault, RuntimeError};
use crate::joblog::{JobLogger, JsonlLogSink, LogEntry, LogSink, MemoryLogSink};
use crate::scheduler::{DispatchRequest, Scheduler};
use crate::store::{CloudStore, DataStore, MemoryStore, RedbStore};
use crate::transport::LocalTransport;
use crate::types::{EvaluationRecord, Job, JobId, JobStatus, WorkerId};
use crate::worker::Worker;
use crate::workflow::{FunctionRegistry, Workflow};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

struct JobEntry {
    job: Job,
    scope: CancellationScope,
}

/// Entry point: owns the worker pool and runs top-level workflows as jobs.
///
/// Must be created inside a Tokio runtime; workers are spawned on it.
pub struct Runtime {
    scheduler: Arc<Scheduler>,
    store: DataStore,
    logger: Arc<JobLogger>,
    registry: Arc<FunctionRegistry>,
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    root: CancellationScope,
}

/// A submitted job
pub struct JobHandle {
    job_id: JobId,
    handle: JoinHandle<Result<Value, Fault>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job's outcome
    pub async fn join(self) -> Result<Value, RuntimeError> {
        match self.handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Fault::Error(error))) => Err(RuntimeError::Workflow(error)),
            Ok(Err(Fault::Cancelled)) => Err(RuntimeError::Cancelled(self.job_id)),
            Err(e) => Err(RuntimeError::Aborted(self.job_id, e.to_string())),
        }
    }
}

impl Runtime {
    /// Build a runtime with the store and log backends named in `config`
    pub fn new(config: &RuntimeConfig, registry: FunctionRegistry) -> Result<Self, RuntimeError> {
        config
            .validate()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;

        let backend: Arc<dyn CloudStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Redb => {
                if let Some(parent) = config.store.path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| RuntimeError::Config(format!("store path: {}", e)))?;
                }
                Arc::new(RedbStore::new(config.store.path.clone())?)
            }
        };

        let sink: Arc<dyn LogSink> = match config.log.backend {
            LogBackend::Memory => Arc::new(MemoryLogSink::new()),
            LogBackend::Jsonl => Arc::new(JsonlLogSink::new(config.log.dir.clone())?),
        };

        Ok(Self::with_backends(config, registry, backend, sink))
    }

    /// In-memory runtime with `workers` workers and default settings
    pub fn local(workers: usize, registry: FunctionRegistry) -> Self {
        let config = RuntimeConfig {
            workers,
            ..RuntimeConfig::default()
        };
        Self::with_backends(
            &config,
            registry,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLogSink::new()),
        )
    }

    pub fn with_backends(
        config: &RuntimeConfig,
        registry: FunctionRegistry,
        backend: Arc<dyn CloudStore>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let worker_ids: Vec<WorkerId> = (0..config.workers.max(1)).map(WorkerId::indexed).collect();
        let (transport, inboxes) = LocalTransport::new(&worker_ids);
        let scheduler = Arc::new(Scheduler::new(Arc::new(transport), worker_ids));

        let store = DataStore::new(backend, config.store.container.clone())
            .with_sequence_chunk_size(config.store.sequence_chunk_size)
            .with_max_transact_retries(config.store.max_transact_retries);
        let logger = Arc::new(JobLogger::new(sink, config.log.policy()));
        let registry = Arc::new(registry);
        let root = CancellationScope::new();

        for (id, inbox) in inboxes {
            let worker = Arc::new(Worker::new(
                id,
                store.detached(),
                logger.clone(),
                registry.clone(),
                scheduler.clone(),
            ));
            tokio::spawn(worker.run(inbox, root.clone()));
        }

        tracing::info!(
            workers = scheduler.worker_count(),
            container = %store.container(),
            "runtime started"
        );

        Self {
            scheduler,
            store,
            logger,
            registry,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            root,
        }
    }

    /// Start `workflow` as a new job. Its bookkeeping is kept until
    /// [`Runtime::forget`] is called.
    pub async fn submit(&self, name: impl Into<String>, workflow: Workflow) -> JobHandle {
        let job = Job::new(JobId::new(), name);
        let job_id = job.id;
        let scope = self.root.child();

        tracing::info!(job_id = %job_id, name = %job.name, "starting job");
        self.jobs.write().await.insert(
            job_id,
            JobEntry {
                job,
                scope: scope.clone(),
            },
        );

        let scheduler = self.scheduler.clone();
        let jobs = self.jobs.clone();
        let handle = tokio::spawn(async move {
            let outcome = scheduler
                .dispatch(DispatchRequest::root(job_id), &workflow, scope)
                .await;

            let (status, error) = match &outcome {
                Ok(_) => (JobStatus::Completed, None),
                Err(Fault::Cancelled) => (JobStatus::Cancelled, None),
                Err(Fault::Error(e)) => (JobStatus::Failed, Some(e.to_string())),
            };

            match &error {
                Some(error) => tracing::error!(job_id = %job_id, "job failed: {}", error),
                None => tracing::info!(job_id = %job_id, status = ?status, "job finished"),
            }

            if let Some(entry) = jobs.write().await.get_mut(&job_id) {
                entry.job.status = status;
                entry.job.completed_at = Some(Utc::now());
                entry.job.error = error;
            }

            outcome
        });

        JobHandle { job_id, handle }
    }

    /// Run `workflow` to completion and drop the job's bookkeeping
    pub async fn run(&self, name: impl Into<String>, workflow: Workflow) -> Result<Value, RuntimeError> {
        let handle = self.submit(name, workflow).await;
        let job_id = handle.job_id();
        let result = handle.join().await;

        if let Err(error) = self.forget(&job_id).await {
            tracing::debug!(job_id = %job_id, "job bookkeeping kept: {}", error);
        }
        result
    }

    /// Run `workflow` and decode its result
    pub async fn run_typed<T: DeserializeOwned>(
        &self,
        name: impl Into<String>,
        workflow: Workflow,
    ) -> Result<T, RuntimeError> {
        let value = self.run(name, workflow).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Request cancellation of a running job. Every outstanding evaluation
    /// of the job observes it.
    pub async fn cancel(&self, job_id: &JobId) -> Result<(), RuntimeError> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(job_id)
            .ok_or(RuntimeError::JobNotFound(*job_id))?;

        if entry.job.status.is_terminal() {
            return Err(RuntimeError::JobNotRunning { job_id: *job_id });
        }

        tracing::info!(job_id = %job_id, "cancelling job");
        entry.scope.cancel();
        Ok(())
    }

    pub async fn job(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(job_id).map(|e| e.job.clone())
    }

    /// All known jobs, oldest first
    pub async fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    /// Evaluations dispatched on behalf of a job
    pub async fn evaluations(&self, job_id: &JobId) -> Vec<EvaluationRecord> {
        self.scheduler.evaluations_of(job_id).await
    }

    /// Drop bookkeeping for a finished job
    pub async fn forget(&self, job_id: &JobId) -> Result<(), RuntimeError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(job_id) {
            None => return Err(RuntimeError::JobNotFound(*job_id)),
            Some(entry) if !entry.job.status.is_terminal() => {
                return Err(RuntimeError::JobRunning { job_id: *job_id })
            }
            Some(_) => {}
        }
        jobs.remove(job_id);
        drop(jobs);

        self.scheduler.prune_job(job_id).await;
        Ok(())
    }

    pub async fn job_log(&self, job_id: &JobId) -> Result<Vec<LogEntry>, RuntimeError> {
        Ok(self.logger.read(job_id).await?)
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }

    /// Cancel every running job and stop the workers
    pub fn shutdown(&self) {
        if !self.root.is_cancelled() {
            tracing::info!("shutting down runtime");
            self.root.cancel();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
