//! Fork-join over child workflows on the worker pool.
//!
//! Both combinators open a child cancellation scope, dispatch every child
//! under its own nested scope, and wait for every child to settle before
//! returning, so no child is still `Running` once the combinator is done.

use crate::cancellation::CancellationScope;
use crate::context::ExecutionContext;
use crate::error::{Fault, WorkflowError};
use crate::workflow::Workflow;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::future::Future;

/// Evaluate every child and collect the results in input order. The first
/// child error cancels the remaining children and becomes the result.
pub async fn run_parallel(workflows: Vec<Workflow>, ctx: &ExecutionContext) -> Result<Vec<Value>, Fault> {
    if workflows.is_empty() {
        return Ok(Vec::new());
    }

    let count = workflows.len();
    let scope = ctx.scope.child();
    let mut children = fork(workflows, ctx, &scope);
    let mut results: Vec<Option<Value>> = vec![None; count];
    let mut failure: Option<WorkflowError> = None;

    while let Some((index, outcome)) = children.next().await {
        match outcome {
            Ok(value) => results[index] = Some(value),
            Err(Fault::Error(error)) => {
                if failure.is_none() {
                    tracing::debug!(
                        evaluation_id = %ctx.evaluation_id,
                        child = index,
                        "parallel child failed, cancelling siblings: {}",
                        error
                    );
                    scope.cancel();
                    failure = Some(error);
                }
            }
            Err(Fault::Cancelled) => {}
        }
    }

    if let Some(error) = failure {
        return Err(Fault::Error(error));
    }
    results
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(Fault::Cancelled)
}

/// Evaluate children until one produces a non-null value, then cancel the
/// rest. An error settled before any value fails the choice; if every child
/// yields null the result is `None`.
pub async fn run_choice(workflows: Vec<Workflow>, ctx: &ExecutionContext) -> Result<Option<Value>, Fault> {
    if workflows.is_empty() {
        return Ok(None);
    }

    let scope = ctx.scope.child();
    let mut children = fork(workflows, ctx, &scope);
    let mut found: Option<Value> = None;
    let mut failure: Option<WorkflowError> = None;

    while let Some((index, outcome)) = children.next().await {
        let decided = found.is_some() || failure.is_some();
        match outcome {
            Ok(Value::Null) | Err(Fault::Cancelled) => {}
            Ok(value) => {
                if !decided {
                    tracing::debug!(
                        evaluation_id = %ctx.evaluation_id,
                        child = index,
                        "choice settled, cancelling siblings"
                    );
                    scope.cancel();
                    found = Some(value);
                }
            }
            Err(Fault::Error(error)) => {
                if !decided {
                    scope.cancel();
                    failure = Some(error);
                }
            }
        }
    }

    if let Some(value) = found {
        return Ok(Some(value));
    }
    if let Some(error) = failure {
        return Err(Fault::Error(error));
    }
    if ctx.scope.is_cancelled() {
        return Err(Fault::Cancelled);
    }
    Ok(None)
}

/// Dispatch each child under its own scope nested in `scope`
fn fork<'a>(
    workflows: Vec<Workflow>,
    ctx: &'a ExecutionContext,
    scope: &CancellationScope,
) -> FuturesUnordered<impl Future<Output = (usize, Result<Value, Fault>)> + Send + 'a> {
    workflows
        .into_iter()
        .enumerate()
        .map(|(index, workflow)| {
            let child_scope = scope.child();
            let request = ctx.child_request();
            async move {
                let outcome = ctx
                    .scheduler
                    .dispatch(request, &workflow, child_scope)
                    .await;
                (index, outcome)
            }
        })
        .collect()
}
