// Core of the Stratus distributed workflow engine

pub mod types;
pub mod error;
pub mod config;
pub mod workflow;
pub mod cancellation;
pub mod store;
pub mod primitives;
pub mod joblog;
pub mod context;
pub mod interpreter;
pub mod combinator;
pub mod transport;
pub mod worker;
pub mod scheduler;
pub mod runtime;
pub mod library;

pub use types::*;
pub use cancellation::CancellationScope;
pub use config::RuntimeConfig;
pub use context::ExecutionContext;
pub use error::{ErrorKind, Fault, RuntimeError, WorkflowError};
pub use primitives::{CloudAtom, CloudCell, CloudSequence, CloudVector};
pub use runtime::{JobHandle, Runtime};
pub use store::{CloudStore, DataStore, StoreError, StoreKey};
pub use workflow::{ExternalOp, FnRef, FunctionRegistry, Workflow};
