//! The task-execution state machine: `pending -> resolving-env ->
//! dispatching -> running -> (ok|skipped|error)`, driven sequentially per
//! the concurrency model (no task-level parallelism; a task's own `uses`
//! handler may parallelize internally, that's its business).
//!
//! Generalizes the teacher's `Executor::execute`/`execute_single_task` loop
//! (`executor.rs`) from depth-grouped parallel stages down to the spec's
//! strict in-order walk over `GraphResolver`'s flattened sequence, wiring in
//! `EnvComposer` and `ConditionEvaluator` between resolution and dispatch.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::compose::EnvComposer;
use crate::condition::ConditionEvaluator;
use crate::dispatch::{DispatchContext, Dispatcher};
use crate::env_store::EnvStore;
use crate::error::Result;
use crate::exec::{CancelHandle, CancelToken};
use crate::graph::GraphResolver;
use crate::model::RunfileModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    ResolvingEnv,
    Dispatching,
    Running,
    Ok,
    Skipped,
    Error,
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub id: String,
    pub state: TaskState,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn failed(&self) -> bool {
        self.state == TaskState::Error
    }
}

pub struct WorkflowOptions {
    pub context: String,
    pub dry_run: bool,
    /// Overrides every task's own `force` expression when `Some` — the
    /// `--force` CLI flag, not a task-level `force:` field.
    pub force: bool,
    pub cache_dir: PathBuf,
}

pub struct Workflow<'a> {
    model: &'a RunfileModel,
    options: WorkflowOptions,
}

impl<'a> Workflow<'a> {
    pub fn new(model: &'a RunfileModel, options: WorkflowOptions) -> Self {
        Self { model, options }
    }

    /// Resolve `targets` and run each task in order, stopping at the first
    /// unforced failure. The environment accumulated by one task (via
    /// `RUN_ENV`/`RUN_PATH` fold-back) is visible to every task after it.
    pub async fn run(&self, targets: &[String]) -> Result<Vec<TaskResult>> {
        let resolver = GraphResolver::new(self.model);
        let sequence = resolver.resolve(targets, &self.options.context)?;

        let mut env = EnvStore::from_process_env();
        let mut results = Vec::with_capacity(sequence.len());
        let (cancel_handle, _cancel_token) = CancelHandle::new();

        for resolved in sequence {
            let started_at = now();

            if self.options.dry_run {
                results.push(TaskResult {
                    id: resolved.id.clone(),
                    state: TaskState::Skipped,
                    exit_code: None,
                    started_at,
                    finished_at: started_at,
                    error: None,
                });
                continue;
            }

            let composer = EnvComposer::new(self.model, &self.options.context);
            let composed = composer.compose(&resolved.id, &resolved.task, &env)?;

            let should_run = self.evaluate_condition(&resolved.task, &composed.env, &composed.cwd)?;
            if !should_run {
                results.push(TaskResult {
                    id: resolved.id.clone(),
                    state: TaskState::Skipped,
                    exit_code: None,
                    started_at,
                    finished_at: now(),
                    error: None,
                });
                continue;
            }

            let hosts: Vec<_> = resolved
                .task
                .hosts
                .iter()
                .filter_map(|name| self.model.hosts.get(name).cloned())
                .collect();

            let mut task_env = composed.env.clone();
            let mut cancel = cancel_handle.token();
            let ctx = DispatchContext {
                task_id: &resolved.id,
                run: resolved.task.run.as_deref(),
                args: &resolved.task.args,
                cwd: &composed.cwd,
                env: &mut task_env,
                cache_dir: &self.options.cache_dir,
                hosts: &hosts,
                cancel: &mut cancel,
            };

            let outcome = Dispatcher::dispatch(resolved.task.uses.as_deref(), ctx).await;
            EnvComposer::fold_back(&mut env, &composed.run_env_file, &composed.run_path_file)?;
            let _ = std::fs::remove_file(&composed.run_env_file);
            let _ = std::fs::remove_file(&composed.run_path_file);
            let _ = std::fs::remove_file(&composed.run_outputs_file);

            let finished_at = now();
            let force = self.options.force
                || self.force_expression_true(&resolved.task, &task_env, &composed.cwd)?;

            match outcome {
                Ok(code) if code == 0 => {
                    results.push(TaskResult {
                        id: resolved.id.clone(),
                        state: TaskState::Ok,
                        exit_code: Some(code),
                        started_at,
                        finished_at,
                        error: None,
                    });
                }
                Ok(code) => {
                    results.push(TaskResult {
                        id: resolved.id.clone(),
                        state: TaskState::Error,
                        exit_code: Some(code),
                        started_at,
                        finished_at,
                        error: Some(format!("exited with status {code}")),
                    });
                    if !force {
                        return Ok(results);
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    results.push(TaskResult {
                        id: resolved.id.clone(),
                        state: TaskState::Error,
                        exit_code: None,
                        started_at,
                        finished_at,
                        error: Some(message),
                    });
                    if !force {
                        return Err(err);
                    }
                }
            }
        }

        Ok(results)
    }

    fn evaluate_condition(
        &self,
        task: &crate::model::Task,
        env: &EnvStore,
        cwd: &std::path::Path,
    ) -> Result<bool> {
        match &task.r#if {
            Some(expr) => ConditionEvaluator::new().evaluate(expr, env, cwd),
            None => Ok(true),
        }
    }

    fn force_expression_true(
        &self,
        task: &crate::model::Task,
        env: &EnvStore,
        cwd: &std::path::Path,
    ) -> Result<bool> {
        match &task.force {
            Some(expr) => ConditionEvaluator::new().evaluate(expr, env, cwd),
            None => Ok(false),
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn model(yaml: &str) -> RunfileModel {
        RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap()
    }

    #[tokio::test]
    async fn dry_run_skips_every_task() {
        let m = model(
            r#"
tasks:
  a:
    run: echo hi
"#,
        );
        let options = WorkflowOptions {
            context: "default".into(),
            dry_run: true,
            force: false,
            cache_dir: tempdir().unwrap().into_path(),
        };
        let workflow = Workflow::new(&m, options);
        let results = workflow.run(&["a".into()]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, TaskState::Skipped);
    }

    #[tokio::test]
    async fn condition_false_skips_without_running() {
        let m = model(
            r#"
tasks:
  a:
    run: echo should-not-run
    if: "1 == 2"
"#,
        );
        let options = WorkflowOptions {
            context: "default".into(),
            dry_run: false,
            force: false,
            cache_dir: tempdir().unwrap().into_path(),
        };
        let workflow = Workflow::new(&m, options);
        let results = workflow.run(&["a".into()]).await.unwrap();
        assert_eq!(results[0].state, TaskState::Skipped);
    }
}
