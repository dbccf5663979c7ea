//! Sandboxed `if`/`condition`/`force` expression evaluation.
//!
//! Repurposes the teacher's `script.rs` `ScriptEngine` sandboxing (same
//! `set_max_expr_depths`/`set_max_operations`/`set_max_modules`/
//! `set_max_string_size` calls) but narrows the registered function surface
//! to read-only predicates: a task's condition expression can ask about the
//! environment and the filesystem, never mutate either.

use std::path::Path;

use rhai::{Dynamic, Engine, EvalAltResult, Scope};

use crate::env_store::EnvStore;
use crate::error::{RunError, Result};

pub struct ConditionEvaluator {
    _marker: std::marker::PhantomData<()>,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }

    fn create_engine(&self, env: EnvStore) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_operations(100_000);
        engine.set_max_modules(10);
        engine.set_max_string_size(1024 * 1024);
        Self::register_stdlib(&mut engine, env);
        engine
    }

    /// Evaluate `expr` (a task's `if`/`condition` or `force` field) against
    /// `env` and `cwd`. A non-boolean result is a schema error, not silently
    /// coerced — matches the spec's "never silently coerce" stance on
    /// ambiguous evaluation outcomes.
    pub fn evaluate(&self, expr: &str, env: &EnvStore, cwd: &Path) -> Result<bool> {
        let mut scope = Scope::new();
        scope.push("cwd", cwd.to_string_lossy().to_string());

        let engine = self.create_engine(env.clone());
        let result: Dynamic = engine
            .eval_with_scope(&mut scope, expr)
            .map_err(|e: Box<EvalAltResult>| RunError::ConditionEval {
                reason: e.to_string(),
            })?;

        result.as_bool().map_err(|_| RunError::ConditionEval {
            reason: format!("expression '{expr}' did not evaluate to a boolean"),
        })
    }

    fn register_stdlib(engine: &mut Engine, env: EnvStore) {
        engine.register_fn("env", move |key: &str| -> String {
            env.get(key).unwrap_or_default().to_string()
        });

        engine.register_fn("file_exists", |path: &str| -> bool {
            Path::new(path).exists()
        });

        engine.register_fn("is_file", |path: &str| -> bool {
            Path::new(path).is_file()
        });

        engine.register_fn("is_dir", |path: &str| -> bool {
            Path::new(path).is_dir()
        });

        engine.register_fn("join_path", |a: &str, b: &str| -> String {
            Path::new(a).join(b).to_string_lossy().to_string()
        });

        engine.register_fn("parent_path", |path: &str| -> String {
            Path::new(path)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default()
        });

        engine.register_fn("file_name", |path: &str| -> String {
            Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });

        engine.register_fn("extension", |path: &str| -> String {
            Path::new(path)
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: &[(&str, &str)]) -> EnvStore {
        let mut s = EnvStore::new();
        for (k, v) in pairs {
            s.set(k, v);
        }
        s
    }

    #[test]
    fn evaluates_env_equality() {
        let evaluator = ConditionEvaluator::new();
        let env = store(&[("CI", "")]);
        let cwd = std::env::current_dir().unwrap();
        let result = evaluator.evaluate(r#"env("CI") == """#, &env, &cwd).unwrap();
        assert!(result);
    }

    #[test]
    fn evaluates_file_exists_false_for_missing_path() {
        let evaluator = ConditionEvaluator::new();
        let env = store(&[]);
        let cwd = std::env::current_dir().unwrap();
        let result = evaluator
            .evaluate(r#"file_exists("/definitely/does/not/exist")"#, &env, &cwd)
            .unwrap();
        assert!(!result);
    }

    #[test]
    fn non_boolean_result_is_an_error() {
        let evaluator = ConditionEvaluator::new();
        let env = store(&[]);
        let cwd = std::env::current_dir().unwrap();
        let err = evaluator.evaluate(r#""just a string""#, &env, &cwd).unwrap_err();
        assert!(matches!(err, RunError::ConditionEval { .. }));
    }

    #[test]
    fn boolean_operators_compose() {
        let evaluator = ConditionEvaluator::new();
        let env = store(&[("ENABLE_FEATURE", "1")]);
        let cwd = std::env::current_dir().unwrap();
        let result = evaluator
            .evaluate(r#"env("ENABLE_FEATURE") == "1" && !is_dir("/nope")"#, &env, &cwd)
            .unwrap();
        assert!(result);
    }
}
