use crate::cancellation::CancellationScope;
use crate::joblog::{JobLogger, LogEntry};
use crate::scheduler::{DispatchRequest, Scheduler};
use crate::store::DataStore;
use crate::types::{EvaluationId, JobId, WorkerId};
use crate::workflow::FunctionRegistry;
use std::sync::Arc;

/// Everything an evaluation can reach while it runs on a worker
#[derive(Clone)]
pub struct ExecutionContext {
    pub job_id: JobId,
    pub evaluation_id: EvaluationId,
    pub worker_id: WorkerId,
    pub scope: CancellationScope,
    pub store: DataStore,
    pub logger: Arc<JobLogger>,
    pub registry: Arc<FunctionRegistry>,
    pub scheduler: Arc<Scheduler>,
}

impl ExecutionContext {
    /// Identifier shared by every evaluation of the job
    pub fn process_id(&self) -> String {
        self.job_id.to_string()
    }

    /// Request for dispatching a child of this evaluation
    pub fn child_request(&self) -> DispatchRequest {
        DispatchRequest::child(self.job_id, self.evaluation_id)
    }

    pub async fn log(&self, message: impl Into<String>) -> bool {
        self.logger
            .log(LogEntry::new(self.job_id, self.worker_id.clone(), message))
            .await
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("job_id", &self.job_id)
            .field("evaluation_id", &self.evaluation_id)
            .field("worker_id", &self.worker_id)
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}
