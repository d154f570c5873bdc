//! Workflow-level helpers built from the core combinators
use crate::workflow::registry::builtins;
use crate::workflow::{FnRef, Workflow};
use serde_json::Value;

/// Search `items` in parallel, returning the first item satisfying
/// `predicate` (null when none does). `predicate` is a continuation mapping
/// an item to a boolean.
pub fn try_find(items: impl IntoIterator<Item = Value>, predicate: FnRef) -> Workflow {
    Workflow::choice(items.into_iter().map(|item| {
        Workflow::value(item.clone())
            .bind(predicate.clone())
            .bind(FnRef::with_env(builtins::SOME_IF, item))
    }))
}

/// Apply the continuation `f` to every item in parallel, keeping order
pub fn parallel_map(items: impl IntoIterator<Item = Value>, f: FnRef) -> Workflow {
    Workflow::parallel(items.into_iter().map(|item| Workflow::value(item).bind(f.clone())))
}

/// Run `workflow` for its effects only
pub fn ignore(workflow: Workflow) -> Workflow {
    workflow.bind(FnRef::new(builtins::IGNORE))
}

/// Turn the outcome into data: `{"ok": value}` or `{"err": error}`.
/// Cancellation still propagates.
pub fn catch(workflow: Workflow) -> Workflow {
    workflow
        .bind(FnRef::new(builtins::OK))
        .try_with(FnRef::new(builtins::ERR))
}

/// Replace any error raised by `workflow` with `fallback`
pub fn recover(workflow: Workflow, fallback: Value) -> Workflow {
    workflow.try_with(FnRef::with_env(builtins::RECOVER, fallback))
}

/// Run `workflows` one after another, keeping the last result
pub fn sequential(workflows: impl IntoIterator<Item = Workflow>) -> Workflow {
    let mut workflows: Vec<Workflow> = workflows.into_iter().collect();
    let Some(mut chain) = workflows.pop() else {
        return Workflow::unit();
    };
    while let Some(previous) = workflows.pop() {
        chain = previous.then(chain);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_try_find_shape() {
        let workflow = try_find(vec![json!(1), json!(2)], FnRef::with_env(builtins::EQUALS, json!(2)));
        match workflow {
            Workflow::Choice { workflows } => {
                assert_eq!(workflows.len(), 2);
                assert_eq!(
                    workflows[1],
                    Workflow::value(json!(2))
                        .bind(FnRef::with_env(builtins::EQUALS, json!(2)))
                        .bind(FnRef::with_env(builtins::SOME_IF, json!(2)))
                );
            }
            other => panic!("expected a choice, got {:?}", other),
        }
    }

    #[test]
    fn test_sequential_of_nothing_is_unit() {
        assert_eq!(sequential(Vec::new()), Workflow::unit());
        assert_eq!(sequential(vec![Workflow::sleep(1)]), Workflow::sleep(1));
    }
}
