//! Tree-structured cooperative cancellation.
//!
//! A [`CancellationScope`] mirrors the combinator nesting: every `Parallel`
//! or `Choice` opens a child scope for its children, and cancelling a scope
//! cancels every scope below it. Cancelling twice is a no-op.

use crate::error::{Fault, WorkflowError};
use std::future::Future;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CancellationScope {
    token: CancellationToken,
}

impl CancellationScope {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Open a nested scope, cancelled whenever this one is
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drive `operation` until it finishes or the scope is cancelled,
    /// whichever comes first. Cancellation wins ties.
    pub async fn guard<T, F>(&self, operation: F) -> Result<T, Fault>
    where
        F: Future<Output = Result<T, WorkflowError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Fault::Cancelled),
            result = operation => result.map_err(Fault::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_propagates_down_not_up() {
        let root = CancellationScope::new();
        let left = root.child();
        let right = root.child();
        let grandchild = left.child();

        left.cancel();
        assert!(left.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert!(!right.is_cancelled());
        assert!(!root.is_cancelled());

        root.cancel();
        root.cancel();
        assert!(right.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_interrupts_pending_operation() {
        let scope = CancellationScope::new();
        let trigger = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), Fault> = scope
            .guard(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(Fault::Cancelled));
    }

    #[tokio::test]
    async fn test_guard_passes_errors_through() {
        let scope = CancellationScope::new();
        let result: Result<(), Fault> = scope
            .guard(async { Err(WorkflowError::evaluation("boom")) })
            .await;
        assert!(matches!(result, Err(Fault::Error(e)) if e.message == "boom"));
    }
}
