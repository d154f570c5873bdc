use crate::cancellation::CancellationScope;
use crate::context::ExecutionContext;
use crate::error::{Fault, WorkflowError};
use crate::interpreter;
use crate::joblog::JobLogger;
use crate::scheduler::Scheduler;
use crate::store::DataStore;
use crate::transport::{encode_outcome, Delivery, Inbox};
use crate::types::WorkerId;
use crate::workflow::{FunctionRegistry, Workflow};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// An execution slot that evaluates the workflows delivered to it
pub struct Worker {
    id: WorkerId,
    store: DataStore,
    logger: Arc<JobLogger>,
    registry: Arc<FunctionRegistry>,
    scheduler: Arc<Scheduler>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        store: DataStore,
        logger: Arc<JobLogger>,
        registry: Arc<FunctionRegistry>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            id,
            store,
            logger,
            registry,
            scheduler,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Accept deliveries until `shutdown` is cancelled or the inbox closes.
    /// Each delivery is evaluated on its own task.
    pub async fn run(self: Arc<Self>, mut inbox: Inbox, shutdown: CancellationScope) {
        tracing::debug!(worker = %self.id, "worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = inbox.recv() => match delivery {
                    Some(delivery) => {
                        let worker = self.clone();
                        tokio::spawn(async move { worker.accept(delivery).await });
                    }
                    None => break,
                },
            }
        }

        tracing::debug!(worker = %self.id, "worker stopped");
    }

    async fn accept(&self, delivery: Delivery) {
        let Delivery {
            envelope,
            scope,
            reply,
        } = delivery;

        let outcome = match Workflow::decode(&envelope.workflow) {
            Ok(workflow) => {
                let ctx = ExecutionContext {
                    job_id: envelope.job_id,
                    evaluation_id: envelope.evaluation_id,
                    worker_id: self.id.clone(),
                    scope,
                    store: self.store.clone(),
                    logger: self.logger.clone(),
                    registry: self.registry.clone(),
                    scheduler: self.scheduler.clone(),
                };
                // A panicking user function fails this evaluation only
                match AssertUnwindSafe(interpreter::evaluate(workflow, &ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(
                            worker = %self.id,
                            evaluation_id = %envelope.evaluation_id,
                            "evaluation panicked: {}",
                            message
                        );
                        Err(Fault::Error(WorkflowError::evaluation(format!(
                            "evaluation panicked: {}",
                            message
                        ))))
                    }
                }
            }
            Err(error) => Err(Fault::Error(error)),
        };

        if let Err(Fault::Error(error)) = &outcome {
            tracing::debug!(
                worker = %self.id,
                evaluation_id = %envelope.evaluation_id,
                "evaluation raised: {}",
                error
            );
        }

        if reply.send(encode_outcome(&outcome)).is_err() {
            tracing::debug!(
                worker = %self.id,
                evaluation_id = %envelope.evaluation_id,
                "dispatcher stopped waiting for the outcome"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
