//! Inert, serializable description of a suspendable computation.
//!
//! A [`Workflow`] never holds closures. Continuations and handlers are
//! [`FnRef`]s: a registry name plus a serializable captured environment,
//! resolved against the [`FunctionRegistry`] every worker carries. That keeps
//! the whole tree transmissible to another worker without losing meaning.

pub mod registry;

pub use registry::FunctionRegistry;

use crate::error::WorkflowError;
use crate::primitives::{CloudAtom, CloudCell, CloudSequence, CloudVector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a registered function together with its captured environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnRef {
    pub name: String,
    #[serde(default)]
    pub env: Value,
}

impl FnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: Value::Null,
        }
    }

    pub fn with_env(name: impl Into<String>, env: Value) -> Self {
        Self {
            name: name.into(),
            env,
        }
    }
}

/// A workflow value. Results are JSON values; `null` doubles as `None` for
/// the option-valued children of [`Workflow::Choice`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Workflow {
    Return {
        value: Value,
    },
    Bind {
        workflow: Box<Workflow>,
        continuation: FnRef,
    },
    /// Fork/join: yields the array of child results in input order
    Parallel {
        workflows: Vec<Workflow>,
    },
    /// Race: yields the first non-null child result, or null
    Choice {
        workflows: Vec<Workflow>,
    },
    OfExternalAsync {
        op: ExternalOp,
    },
    TryWith {
        body: Box<Workflow>,
        handler: FnRef,
    },
    Raise {
        error: WorkflowError,
    },
}

impl Workflow {
    /// Return a serializable value. A value that fails to serialize becomes
    /// a `Raise` of a serialization error.
    pub fn ret<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Workflow::Return { value },
            Err(e) => Workflow::raise(WorkflowError::serialization(e)),
        }
    }

    pub fn value(value: Value) -> Self {
        Workflow::Return { value }
    }

    pub fn unit() -> Self {
        Workflow::Return { value: Value::Null }
    }

    pub fn none() -> Self {
        Workflow::Return { value: Value::Null }
    }

    pub fn raise(error: WorkflowError) -> Self {
        Workflow::Raise { error }
    }

    pub fn bind(self, continuation: FnRef) -> Self {
        Workflow::Bind {
            workflow: Box::new(self),
            continuation,
        }
    }

    pub fn try_with(self, handler: FnRef) -> Self {
        Workflow::TryWith {
            body: Box::new(self),
            handler,
        }
    }

    pub fn parallel(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        Workflow::Parallel {
            workflows: workflows.into_iter().collect(),
        }
    }

    pub fn choice(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        Workflow::Choice {
            workflows: workflows.into_iter().collect(),
        }
    }

    pub fn external(op: ExternalOp) -> Self {
        Workflow::OfExternalAsync { op }
    }

    pub fn sleep(millis: u64) -> Self {
        Self::external(ExternalOp::Sleep { millis })
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::external(ExternalOp::Log {
            message: message.into(),
        })
    }

    pub fn logf(format: impl Into<String>, args: Vec<Value>) -> Self {
        Self::external(ExternalOp::Logf {
            format: format.into(),
            args,
        })
    }

    pub fn invoke(function: impl Into<String>, arg: Value) -> Self {
        Self::external(ExternalOp::Invoke {
            function: function.into(),
            arg,
        })
    }

    /// Sequence `self` before `next`, discarding the first result
    pub fn then(self, next: Workflow) -> Self {
        match serde_json::to_value(&next) {
            Ok(env) => self.bind(FnRef::with_env(registry::builtins::THEN, env)),
            Err(e) => Workflow::raise(WorkflowError::serialization(e)),
        }
    }

    /// Encode for transmission to another worker
    pub fn encode(&self) -> Result<Vec<u8>, WorkflowError> {
        serde_json::to_vec(self).map_err(WorkflowError::serialization)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WorkflowError> {
        serde_json::from_slice(bytes).map_err(WorkflowError::serialization)
    }
}

/// Suspending operations a workflow can embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExternalOp {
    Sleep {
        millis: u64,
    },
    Log {
        message: String,
    },
    /// `{}` placeholders in `format` are replaced by `args` in order
    Logf {
        format: String,
        args: Vec<Value>,
    },
    GetWorkerCount,
    GetProcessId,
    GetWorkerId,
    /// Call an async function registered under `function`
    Invoke {
        function: String,
        arg: Value,
    },

    CellNew {
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    CellValue {
        cell: CloudCell<Value>,
    },
    CellParse {
        name: String,
    },

    SequenceNew {
        items: Vec<Value>,
    },
    SequenceEnumerate {
        sequence: CloudSequence<Value>,
    },
    SequenceGet {
        sequence: CloudSequence<Value>,
        index: usize,
    },

    VectorOfPartitions {
        partitions: Vec<CloudSequence<Value>>,
    },
    VectorEnumerate {
        vector: CloudVector<Value>,
    },

    AtomNew {
        value: Value,
    },
    AtomRead {
        atom: CloudAtom<Value>,
    },
    /// Apply `update` (a registered update function whose flag is ignored)
    /// until it lands
    AtomSet {
        atom: CloudAtom<Value>,
        update: FnRef,
    },
    AtomForce {
        atom: CloudAtom<Value>,
        value: Value,
    },
    AtomTransact {
        atom: CloudAtom<Value>,
        update: FnRef,
    },
    AtomFree {
        atom: CloudAtom<Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_survives_encoding() {
        let workflow = Workflow::parallel(vec![
            Workflow::ret(1).bind(FnRef::with_env("add", json!(2))),
            Workflow::sleep(10).then(Workflow::ret("done")),
            Workflow::raise(WorkflowError::evaluation("boom")),
        ])
        .try_with(FnRef::new("recover"));

        let bytes = workflow.encode().unwrap();
        let decoded = Workflow::decode(&bytes).unwrap();
        assert_eq!(decoded, workflow);
    }

    #[test]
    fn test_tagged_json_shape() {
        let value = serde_json::to_value(Workflow::sleep(5)).unwrap();
        assert_eq!(
            value,
            json!({"type": "of_external_async", "op": {"op": "sleep", "millis": 5}})
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Workflow::decode(b"{\"type\": \"teleport\"}").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Serialization);
    }
}
