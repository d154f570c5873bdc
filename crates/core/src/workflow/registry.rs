use crate::error::WorkflowError;
use crate::workflow::{FnRef, Workflow};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Maps a step result (and the captured environment) to the next workflow
pub type ContinuationFn =
    dyn Fn(Value, &Value) -> Result<Workflow, WorkflowError> + Send + Sync;

/// Maps a caught error (and the captured environment) to a recovery workflow
pub type HandlerFn =
    dyn Fn(WorkflowError, &Value) -> Result<Workflow, WorkflowError> + Send + Sync;

/// Atom update: maps the current value to `(apply, next)`
pub type UpdateFn =
    dyn Fn(Value, &Value) -> Result<(bool, Value), WorkflowError> + Send + Sync;

/// Async function callable through `ExternalOp::Invoke`
pub type AsyncFn =
    dyn Fn(Value) -> BoxFuture<'static, Result<Value, WorkflowError>> + Send + Sync;

/// Names of the functions every registry starts with
pub mod builtins {
    /// Continuation whose env is an encoded workflow to run next
    pub const THEN: &str = "stratus.then";
    pub const IDENTITY: &str = "stratus.identity";
    pub const IGNORE: &str = "stratus.ignore";
    /// Continuation returning its env
    pub const CONST: &str = "stratus.const";
    /// Continuation taking a bool and returning its env when true, else null
    pub const SOME_IF: &str = "stratus.some_if";
    /// Continuation returning `input == env`
    pub const EQUALS: &str = "stratus.equals";
    /// Continuation wrapping its input as `{"ok": input}`
    pub const OK: &str = "stratus.ok";
    /// Handler wrapping the error as `{"err": error}`
    pub const ERR: &str = "stratus.err";
    /// Handler returning its env as the fallback value
    pub const RECOVER: &str = "stratus.recover";
    /// Atom update adding its numeric env to the current value
    pub const ADD: &str = "stratus.add";
}

/// Registry of named functions resolved by [`FnRef`]s.
///
/// Every worker holds the same registry, so a continuation captured on one
/// worker can be resumed on another. Registering a name twice is an error.
#[derive(Clone)]
pub struct FunctionRegistry {
    continuations: HashMap<String, Arc<ContinuationFn>>,
    handlers: HashMap<String, Arc<HandlerFn>>,
    updates: HashMap<String, Arc<UpdateFn>>,
    functions: HashMap<String, Arc<AsyncFn>>,
}

impl FunctionRegistry {
    /// Create a registry preloaded with the [`builtins`]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.install_builtins();
        registry
    }

    /// Create a registry without builtins
    pub fn empty() -> Self {
        Self {
            continuations: HashMap::new(),
            handlers: HashMap::new(),
            updates: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    pub fn register_continuation<F>(&mut self, name: &str, function: F) -> Result<(), WorkflowError>
    where
        F: Fn(Value, &Value) -> Result<Workflow, WorkflowError> + Send + Sync + 'static,
    {
        Self::insert(&mut self.continuations, name, Arc::new(function))
    }

    pub fn register_handler<F>(&mut self, name: &str, function: F) -> Result<(), WorkflowError>
    where
        F: Fn(WorkflowError, &Value) -> Result<Workflow, WorkflowError> + Send + Sync + 'static,
    {
        Self::insert(&mut self.handlers, name, Arc::new(function))
    }

    pub fn register_update<F>(&mut self, name: &str, function: F) -> Result<(), WorkflowError>
    where
        F: Fn(Value, &Value) -> Result<(bool, Value), WorkflowError> + Send + Sync + 'static,
    {
        Self::insert(&mut self.updates, name, Arc::new(function))
    }

    pub fn register_function<F, Fut>(&mut self, name: &str, function: F) -> Result<(), WorkflowError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        let boxed: Arc<AsyncFn> = Arc::new(move |arg: Value| function(arg).boxed());
        Self::insert(&mut self.functions, name, boxed)
    }

    fn insert<T: ?Sized>(
        map: &mut HashMap<String, Arc<T>>,
        name: &str,
        function: Arc<T>,
    ) -> Result<(), WorkflowError> {
        if map.contains_key(name) {
            return Err(WorkflowError::evaluation(format!(
                "function '{}' is already registered",
                name
            )));
        }
        map.insert(name.to_string(), function);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.continuations.contains_key(name)
            || self.handlers.contains_key(name)
            || self.updates.contains_key(name)
            || self.functions.contains_key(name)
    }

    /// Apply a continuation to a step result
    pub fn continue_with(&self, continuation: &FnRef, input: Value) -> Result<Workflow, WorkflowError> {
        let function = self
            .continuations
            .get(&continuation.name)
            .ok_or_else(|| WorkflowError::unknown_function(&continuation.name))?;
        function(input, &continuation.env)
    }

    /// Hand a caught error to a handler
    pub fn handle(&self, handler: &FnRef, error: WorkflowError) -> Result<Workflow, WorkflowError> {
        let function = self
            .handlers
            .get(&handler.name)
            .ok_or_else(|| WorkflowError::unknown_function(&handler.name))?;
        function(error, &handler.env)
    }

    /// Resolve an atom update so it can be retried against fresh values
    pub fn update(&self, update: &FnRef) -> Result<Arc<UpdateFn>, WorkflowError> {
        self.updates
            .get(&update.name)
            .cloned()
            .ok_or_else(|| WorkflowError::unknown_function(&update.name))
    }

    pub fn invoke(&self, name: &str, arg: Value) -> Result<BoxFuture<'static, Result<Value, WorkflowError>>, WorkflowError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| WorkflowError::unknown_function(name))?;
        Ok(function(arg))
    }

    fn install_builtins(&mut self) {
        let continuations: [(&str, Arc<ContinuationFn>); 7] = [
            (
                builtins::THEN,
                Arc::new(|_: Value, env: &Value| {
                    serde_json::from_value(env.clone()).map_err(WorkflowError::serialization)
                }),
            ),
            (builtins::IDENTITY, Arc::new(|input: Value, _: &Value| Ok(Workflow::value(input)))),
            (builtins::IGNORE, Arc::new(|_: Value, _: &Value| Ok(Workflow::unit()))),
            (builtins::CONST, Arc::new(|_: Value, env: &Value| Ok(Workflow::value(env.clone())))),
            (
                builtins::SOME_IF,
                Arc::new(|input: Value, env: &Value| match input {
                    Value::Bool(true) => Ok(Workflow::value(env.clone())),
                    Value::Bool(false) => Ok(Workflow::none()),
                    other => Err(WorkflowError::evaluation(format!(
                        "predicate returned {} instead of a boolean",
                        other
                    ))),
                }),
            ),
            (
                builtins::EQUALS,
                Arc::new(|input: Value, env: &Value| Ok(Workflow::value(Value::Bool(&input == env)))),
            ),
            (
                builtins::OK,
                Arc::new(|input: Value, _: &Value| Ok(Workflow::value(serde_json::json!({ "ok": input })))),
            ),
        ];
        for (name, function) in continuations {
            self.continuations.insert(name.to_string(), function);
        }

        let handlers: [(&str, Arc<HandlerFn>); 2] = [
            (
                builtins::ERR,
                Arc::new(|error: WorkflowError, _: &Value| Ok(Workflow::ret(serde_json::json!({ "err": error })))),
            ),
            (builtins::RECOVER, Arc::new(|_: WorkflowError, env: &Value| Ok(Workflow::value(env.clone())))),
        ];
        for (name, function) in handlers {
            self.handlers.insert(name.to_string(), function);
        }

        self.updates.insert(
            builtins::ADD.to_string(),
            Arc::new(|current: Value, env: &Value| add_numbers(&current, env).map(|sum| (true, sum))),
        );
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("continuations", &self.continuations.len())
            .field("handlers", &self.handlers.len())
            .field("updates", &self.updates.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

fn add_numbers(left: &Value, right: &Value) -> Result<Value, WorkflowError> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return a.checked_add(b).map(Value::from).ok_or_else(|| {
            WorkflowError::evaluation(format!("integer overflow adding {} and {}", a, b))
        });
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::from(a + b)),
        _ => Err(WorkflowError::evaluation(format!(
            "cannot add {} and {}",
            left, right
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_continuation("double", |v, _| Ok(Workflow::value(json!(v.as_i64().unwrap_or(0) * 2))))
            .unwrap();

        let err = registry
            .register_continuation("double", |v, _| Ok(Workflow::value(v)))
            .unwrap_err();
        assert!(err.message.contains("already registered"));
    }

    #[test]
    fn test_unknown_continuation() {
        let registry = FunctionRegistry::new();
        let err = registry
            .continue_with(&FnRef::new("missing"), Value::Null)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownFunction);
    }

    #[test]
    fn test_builtin_some_if() {
        let registry = FunctionRegistry::new();
        let k = FnRef::with_env(builtins::SOME_IF, json!(7));

        assert_eq!(registry.continue_with(&k, json!(true)).unwrap(), Workflow::value(json!(7)));
        assert_eq!(registry.continue_with(&k, json!(false)).unwrap(), Workflow::none());
        assert!(registry.continue_with(&k, json!("yes")).is_err());
    }

    #[test]
    fn test_builtin_add_update() {
        let registry = FunctionRegistry::new();
        let update = registry.update(&FnRef::new(builtins::ADD)).unwrap();

        assert_eq!(update(json!(4), &json!(3)).unwrap(), (true, json!(7)));
        assert_eq!(update(json!(1.5), &json!(1)).unwrap(), (true, json!(2.5)));
        assert!(update(json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn test_builtin_add_overflow_is_an_error() {
        let registry = FunctionRegistry::new();
        let update = registry.update(&FnRef::new(builtins::ADD)).unwrap();

        let err = update(json!(i64::MAX), &json!(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Evaluation);
        assert!(err.message.contains("overflow"));
        assert_eq!(update(json!(i64::MIN), &json!(-1)).unwrap_err().kind, ErrorKind::Evaluation);
    }

    #[tokio::test]
    async fn test_invoke_registered_function() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_function("square", |arg: Value| async move {
                let n = arg.as_i64().ok_or_else(|| WorkflowError::evaluation("not a number"))?;
                Ok(json!(n * n))
            })
            .unwrap();

        let result = registry.invoke("square", json!(9)).unwrap().await.unwrap();
        assert_eq!(result, json!(81));
        assert!(registry.invoke("cube", json!(2)).is_err());
    }
}
