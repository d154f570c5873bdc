//! Workflow interpreter.
//!
//! Evaluation is an explicit machine: `Bind` and `TryWith` push frames onto
//! a stack, and every produced outcome unwinds that stack. A value resumes
//! the nearest `Bind` continuation; an error resumes the nearest `TryWith`
//! handler; cancellation unwinds everything and is never handled. Deep
//! `Bind` chains therefore never grow the native stack.

pub mod ops;

use crate::combinator;
use crate::context::ExecutionContext;
use crate::error::Fault;
use crate::workflow::{FnRef, Workflow};
use serde_json::Value;

const YIELD_INTERVAL: u64 = 1024;

enum Frame {
    Bind(FnRef),
    TryWith(FnRef),
}

enum Step {
    Eval(Workflow),
    Resume(Result<Value, Fault>),
}

/// Run a workflow to completion in `ctx`
pub async fn evaluate(workflow: Workflow, ctx: &ExecutionContext) -> Result<Value, Fault> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut step = Step::Eval(workflow);
    let mut steps: u64 = 0;

    loop {
        steps += 1;
        if steps % YIELD_INTERVAL == 0 {
            // Long pure chains never reach an await otherwise
            tokio::task::yield_now().await;
        }
        if ctx.scope.is_cancelled() {
            tracing::trace!(evaluation_id = %ctx.evaluation_id, "evaluation observed cancellation");
            return Err(Fault::Cancelled);
        }

        step = match step {
            Step::Eval(workflow) => match workflow {
                Workflow::Return { value } => Step::Resume(Ok(value)),
                Workflow::Raise { error } => Step::Resume(Err(Fault::Error(error))),
                Workflow::Bind {
                    workflow,
                    continuation,
                } => {
                    stack.push(Frame::Bind(continuation));
                    Step::Eval(*workflow)
                }
                Workflow::TryWith { body, handler } => {
                    stack.push(Frame::TryWith(handler));
                    Step::Eval(*body)
                }
                Workflow::Parallel { workflows } => Step::Resume(
                    combinator::run_parallel(workflows, ctx)
                        .await
                        .map(Value::Array),
                ),
                Workflow::Choice { workflows } => Step::Resume(
                    combinator::run_choice(workflows, ctx)
                        .await
                        .map(|found| found.unwrap_or(Value::Null)),
                ),
                Workflow::OfExternalAsync { op } => Step::Resume(ops::perform(op, ctx).await),
            },

            Step::Resume(Ok(value)) => {
                // A body that finished normally leaves its handler behind
                let Some(continuation) = pop_continuation(&mut stack) else {
                    return Ok(value);
                };
                match ctx.registry.continue_with(&continuation, value) {
                    Ok(next) => Step::Eval(next),
                    Err(error) => Step::Resume(Err(Fault::Error(error))),
                }
            }

            Step::Resume(Err(Fault::Error(error))) => {
                let Some(handler) = pop_handler(&mut stack) else {
                    return Err(Fault::Error(error));
                };
                tracing::debug!(
                    evaluation_id = %ctx.evaluation_id,
                    handler = %handler.name,
                    "handling error: {}",
                    error
                );
                match ctx.registry.handle(&handler, error) {
                    Ok(next) => Step::Eval(next),
                    Err(error) => Step::Resume(Err(Fault::Error(error))),
                }
            }

            Step::Resume(Err(Fault::Cancelled)) => return Err(Fault::Cancelled),
        };
    }
}

/// Nearest pending continuation, dropping handlers whose bodies completed
fn pop_continuation(stack: &mut Vec<Frame>) -> Option<FnRef> {
    while let Some(frame) = stack.pop() {
        if let Frame::Bind(continuation) = frame {
            return Some(continuation);
        }
    }
    None
}

/// Nearest enclosing handler, dropping the continuations it skips
fn pop_handler(stack: &mut Vec<Frame>) -> Option<FnRef> {
    while let Some(frame) = stack.pop() {
        if let Frame::TryWith(handler) = frame {
            return Some(handler);
        }
    }
    None
}
