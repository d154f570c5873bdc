use crate::context::ExecutionContext;
use crate::error::{Fault, WorkflowError};
use crate::joblog::format_message;
use crate::primitives::{CloudAtom, CloudCell, CloudSequence, CloudVector};
use crate::workflow::ExternalOp;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Perform one external operation. Every suspending operation races the
/// evaluation's cancellation scope.
pub async fn perform(op: ExternalOp, ctx: &ExecutionContext) -> Result<Value, Fault> {
    match op {
        ExternalOp::Sleep { millis } => {
            ctx.scope
                .guard(async {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok(Value::Null)
                })
                .await
        }
        ExternalOp::Log { message } => {
            ctx.scope
                .guard(async {
                    ctx.log(message).await;
                    Ok(Value::Null)
                })
                .await
        }
        ExternalOp::Logf { format, args } => {
            ctx.scope
                .guard(async {
                    ctx.log(format_message(&format, &args)).await;
                    Ok(Value::Null)
                })
                .await
        }
        ExternalOp::GetWorkerCount => Ok(Value::from(ctx.scheduler.worker_count())),
        ExternalOp::GetProcessId => Ok(Value::String(ctx.process_id())),
        ExternalOp::GetWorkerId => Ok(Value::String(ctx.worker_id.to_string())),
        ExternalOp::Invoke { function, arg } => {
            let call = ctx.registry.invoke(&function, arg)?;
            ctx.scope.guard(call).await
        }
        op => ctx.scope.guard(store_op(op, ctx)).await,
    }
}

async fn store_op(op: ExternalOp, ctx: &ExecutionContext) -> Result<Value, WorkflowError> {
    let store = &ctx.store;

    match op {
        ExternalOp::CellNew { value, name } => {
            let cell = match name {
                Some(name) => CloudCell::new_named(store, &name, &value).await?,
                None => CloudCell::new(store, &value).await?,
            };
            to_value(&cell)
        }
        ExternalOp::CellValue { cell } => Ok(cell.value(store).await?),
        ExternalOp::CellParse { name } => to_value(&CloudCell::<Value>::parse(store, &name).await?),

        ExternalOp::SequenceNew { items } => to_value(&CloudSequence::new(store, &items).await?),
        ExternalOp::SequenceEnumerate { sequence } => {
            Ok(Value::Array(sequence.to_vec(store).await?))
        }
        ExternalOp::SequenceGet { sequence, index } => Ok(sequence.get(store, index).await?),

        ExternalOp::VectorOfPartitions { partitions } => {
            to_value(&CloudVector::of_partitions(partitions))
        }
        ExternalOp::VectorEnumerate { vector } => Ok(Value::Array(vector.to_vec(store).await?)),

        ExternalOp::AtomNew { value } => to_value(&CloudAtom::new(store, &value).await?),
        ExternalOp::AtomRead { atom } => Ok(atom.read(store).await?),
        ExternalOp::AtomForce { atom, value } => {
            atom.force(store, &value).await?;
            Ok(Value::Null)
        }
        ExternalOp::AtomSet { atom, update } => {
            let apply = ctx.registry.update(&update)?;
            atom.try_transact(store, |current| {
                apply(current, &update.env).map(|(_, next)| (true, next))
            })
            .await?;
            Ok(Value::Null)
        }
        ExternalOp::AtomTransact { atom, update } => {
            let apply = ctx.registry.update(&update)?;
            let applied = atom
                .try_transact(store, |current| apply(current, &update.env))
                .await?;
            Ok(Value::Bool(applied))
        }
        ExternalOp::AtomFree { atom } => {
            atom.free(store).await?;
            Ok(Value::Null)
        }

        other => Err(WorkflowError::evaluation(format!(
            "{:?} is not a store operation",
            other
        ))),
    }
}

fn to_value<T: Serialize>(handle: &T) -> Result<Value, WorkflowError> {
    Ok(serde_json::to_value(handle)?)
}
