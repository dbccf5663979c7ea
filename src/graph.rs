//! Flattens a target list into an ordered, deduplicated task sequence,
//! detecting cycles and injecting hooks.
//!
//! This is a direct port of the recursive flattening algorithm the spec
//! describes in §4.5 (itself grounded on the original `internal/workflows`
//! `FlattenTasks`/cycle-walk logic) — not the teacher's `petgraph`
//! topological-sort-plus-depth-grouping `TaskGraph`, since the spec's
//! concurrency model (§5) forbids task-level parallelism at this layer.
//! `petgraph` stays in the dependency stack for the CLI's `graph` rendering
//! subcommand (`src/cli.rs`), which is where the teacher used it too.

use std::collections::HashMap;

use crate::error::{RunError, Result};
use crate::model::{RunfileModel, Task};

/// A task together with the id it was resolved to (after any `:context`
/// specialization), as produced by `GraphResolver::resolve`.
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub id: String,
    pub task: Task,
}

pub struct GraphResolver<'a> {
    model: &'a RunfileModel,
}

impl<'a> GraphResolver<'a> {
    pub fn new(model: &'a RunfileModel) -> Self {
        Self { model }
    }

    /// Resolve `targets` under `context` into the ordered sequence the spec
    /// describes: each target's dependencies first, then its `before`
    /// hooks, then the target itself (if not already present), then its
    /// `after` hooks.
    pub fn resolve(&self, targets: &[String], context: &str) -> Result<Vec<ResolvedTask>> {
        self.check_cycles(targets, context)?;

        let mut sequence: Vec<ResolvedTask> = Vec::new();
        let mut present: HashMap<String, usize> = HashMap::new();

        for target in targets {
            self.flatten_one(target, context, &mut sequence, &mut present)?;
        }

        Ok(sequence)
    }

    /// Look up `name` preferring `name:context`, falling back to bare
    /// `name`.
    fn lookup(&self, name: &str, context: &str) -> Option<(String, &Task)> {
        let specialized = Task::specialized_id(name, context);
        if let Some(task) = self.model.tasks.get(&specialized) {
            return Some((specialized, task));
        }
        self.model.tasks.get(name).map(|t| (name.to_string(), t))
    }

    fn flatten_one(
        &self,
        name: &str,
        context: &str,
        sequence: &mut Vec<ResolvedTask>,
        present: &mut HashMap<String, usize>,
    ) -> Result<()> {
        let (resolved_id, task) = self.lookup(name, context).ok_or_else(|| RunError::TargetNotFound {
            name: name.to_string(),
            available: self.model.task_names(),
        })?;

        for dep in &task.needs {
            self.flatten_one(dep, context, sequence, present)?;
        }

        for suffix in task.hooks.before.resolve("before") {
            self.flatten_hook(&format!("{resolved_id}:{suffix}"), context, sequence, present)?;
        }

        if !present.contains_key(&resolved_id) {
            present.insert(resolved_id.clone(), sequence.len());
            sequence.push(ResolvedTask { id: resolved_id.clone(), task: task.clone() });
        }

        for suffix in task.hooks.after.resolve("after") {
            self.flatten_hook(&format!("{resolved_id}:{suffix}"), context, sequence, present)?;
        }

        Ok(())
    }

    /// Hooks are opt-in: a hook suffix that doesn't name an existing task
    /// is simply skipped rather than failing resolution.
    fn flatten_hook(
        &self,
        hook_id: &str,
        context: &str,
        sequence: &mut Vec<ResolvedTask>,
        present: &mut HashMap<String, usize>,
    ) -> Result<()> {
        if self.lookup(hook_id, context).is_none() {
            return Ok(());
        }
        self.flatten_one(hook_id, context, sequence, present)
    }

    /// Cycle detection runs before any flattening, over the full `needs`
    /// graph reachable from `targets`, via a depth-first walk maintaining
    /// an explicit stack; re-entry onto the stack is the cycle, and its
    /// tail is the reported path.
    fn check_cycles(&self, targets: &[String], context: &str) -> Result<()> {
        let mut stack: Vec<String> = Vec::new();
        for target in targets {
            self.walk_for_cycle(target, context, &mut stack)?;
        }
        Ok(())
    }

    fn walk_for_cycle(&self, name: &str, context: &str, stack: &mut Vec<String>) -> Result<()> {
        let Some((resolved_id, task)) = self.lookup(name, context) else {
            return Ok(()); // reported properly by flatten_one later
        };
        if let Some(pos) = stack.iter().position(|s| s == &resolved_id) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(resolved_id);
            return Err(RunError::CyclicReference { cycle });
        }
        stack.push(resolved_id);
        for dep in &task.needs {
            self.walk_for_cycle(dep, context, stack)?;
        }
        stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunfileModel;
    use std::path::Path;

    fn model(yaml: &str) -> RunfileModel {
        RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap()
    }

    #[test]
    fn resolves_plain_dependency_order() {
        let m = model(
            r#"
tasks:
  build:
    run: echo build
  deploy:
    needs: [build]
    run: echo deploy
"#,
        );
        let resolver = GraphResolver::new(&m);
        let resolved = resolver.resolve(&["deploy".into()], "default").unwrap();
        assert_eq!(
            resolved.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["build", "deploy"]
        );
    }

    #[test]
    fn hook_ordering_scenario() {
        let m = model(
            r#"
tasks:
  build:
    run: echo build
  deploy:
    needs: [build]
    run: echo deploy
    hooks:
      before: [setup]
      after: [cleanup]
  deploy:setup:
    run: echo setup
  deploy:cleanup:
    run: echo cleanup
"#,
        );
        let resolver = GraphResolver::new(&m);
        let resolved = resolver.resolve(&["deploy".into()], "default").unwrap();
        assert_eq!(
            resolved.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["build", "deploy:setup", "deploy", "deploy:cleanup"]
        );
    }

    #[test]
    fn cycle_is_detected_before_execution() {
        let m = model(
            r#"
tasks:
  a:
    needs: [b]
    run: echo a
  b:
    needs: [a]
    run: echo b
"#,
        );
        let resolver = GraphResolver::new(&m);
        let err = resolver.resolve(&["a".into()], "default").unwrap_err();
        assert!(matches!(err, RunError::CyclicReference { .. }));
    }

    #[test]
    fn no_id_appears_twice() {
        let m = model(
            r#"
tasks:
  shared:
    run: echo shared
  a:
    needs: [shared]
    run: echo a
  b:
    needs: [shared, a]
    run: echo b
"#,
        );
        let resolver = GraphResolver::new(&m);
        let resolved = resolver.resolve(&["b".into()], "default").unwrap();
        let ids: Vec<_> = resolved.iter().map(|r| r.id.as_str()).collect();
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn context_specialization_prefers_specialized_then_falls_back() {
        let m = model(
            r#"
tasks:
  build:
    run: echo generic build
  build:prod:
    run: echo prod build
  deploy:prod:
    needs: [build]
    run: echo deploy prod
"#,
        );
        let resolver = GraphResolver::new(&m);
        let resolved = resolver.resolve(&["deploy".into()], "prod").unwrap();
        assert_eq!(
            resolved.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["build:prod", "deploy:prod"]
        );
    }

    #[test]
    fn target_not_found_lists_available_tasks() {
        let m = model(
            r#"
tasks:
  build:
    run: echo build
"#,
        );
        let resolver = GraphResolver::new(&m);
        let err = resolver.resolve(&["missing".into()], "default").unwrap_err();
        match err {
            RunError::TargetNotFound { name, available } => {
                assert_eq!(name, "missing");
                assert_eq!(available, vec!["build".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
