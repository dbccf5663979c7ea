//! Builds a task's environment from the layered cascade described in
//! spec §4.6. The teacher has no multi-layer composer of this shape
//! (`TaskConfig.env` is a single flat overlay); the eight-layer order here
//! is grounded in the original `internal/workflows/run.go` +
//! `internal/schema/env.go`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::dotenv::DotEnvDocument;
use crate::env_store::EnvStore;
use crate::error::{RunError, Result};
use crate::expander::Expander;
use crate::model::{EnvEntry, EnvOverlay, ParamValue, RunfileConfig, RunfileModel, Task};

/// Everything a composed task environment also needs to report back to the
/// caller: the freshly-created side-channel file paths a handler will
/// write `RUN_ENV`/`RUN_PATH`/`RUN_OUTPUTS` content into.
pub struct ComposedEnv {
    pub env: EnvStore,
    pub run_env_file: PathBuf,
    pub run_path_file: PathBuf,
    pub run_outputs_file: PathBuf,
    pub cwd: PathBuf,
}

pub struct EnvComposer<'a> {
    model: &'a RunfileModel,
    run_root: PathBuf,
    context: String,
    version: &'static str,
}

impl<'a> EnvComposer<'a> {
    pub fn new(model: &'a RunfileModel, context: &str) -> Self {
        let run_root = model
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            model,
            run_root,
            context: context.to_string(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Compose the environment for one resolved task, starting from the
    /// workflow's currently accumulated environment (so fold-back from
    /// earlier tasks, per invariant iv, is visible here).
    pub fn compose(&self, task_id: &str, task: &Task, inherited: &EnvStore) -> Result<ComposedEnv> {
        let mut env = inherited.clone();

        self.apply_os_normalization(&mut env);
        self.inject_runner_keys(&mut env, task_id)?;

        let run_env_file = temp_file("run-env")?;
        let run_path_file = temp_file("run-path")?;
        let run_outputs_file = temp_file("run-outputs")?;
        env.set("RUN_ENV", &run_env_file.to_string_lossy());
        env.set("RUN_PATH", &run_path_file.to_string_lossy());
        env.set("RUN_OUTPUTS", &run_outputs_file.to_string_lossy());

        self.apply_config_paths(&mut env, &self.model.config)?;
        self.apply_dotenv_cascade(&mut env, task)?;
        self.apply_overlay(&mut env, &self.model.env)?;
        self.apply_overlay(&mut env, &task.env)?;

        let cwd = self.resolve_cwd(&env, task)?;
        env.set("RUN_TASK_ID", task_id);
        env.set("RUN_TASK_NAME", task.name.as_deref().unwrap_or(task_id));
        env.set("RUN_TASK_DIR", &cwd.to_string_lossy());
        env.set("RUN_TASK_CWD", &cwd.to_string_lossy());

        // This engine has no multi-step `Step` loop of its own (the loader
        // that expands a `with:` map into a `Step` list is external per
        // spec §3); each task stands in as its own single step, so the
        // RUN_STEP_* keys just mirror the task's own identity at index 0.
        env.set("RUN_STEP_ID", task_id);
        env.set("RUN_STEP_NAME", task.name.as_deref().unwrap_or(task_id));
        env.set("RUN_STEP_INDEX", "0");
        env.set("RUN_STEP_CWD", &cwd.to_string_lossy());
        self.inject_inputs(&mut env, task);

        Ok(ComposedEnv {
            env,
            run_env_file,
            run_path_file,
            run_outputs_file,
            cwd,
        })
    }

    fn apply_os_normalization(&self, env: &mut EnvStore) {
        env.set("OS_PLATFORM", std::env::consts::OS);
        env.set("OS_ARCH", std::env::consts::ARCH);

        if cfg!(windows) {
            let home = env.get("USERPROFILE").map(str::to_string);
            if let Some(home) = &home {
                env.set("HOME", home);
                env.set("HOMEPATH", home);
            }
            if let Some(user) = env.get("USERNAME").map(str::to_string) {
                env.set("USER", &user);
            }
            if let Some(hostname) = env.get("COMPUTERNAME").map(str::to_string) {
                env.set("HOSTNAME", &hostname);
            }
            if !env.has("SHELL") {
                env.set("SHELL", "cmd.exe");
            }
            if let Some(home) = &home {
                for (key, suffix) in [
                    ("XDG_CONFIG_HOME", "AppData/Roaming"),
                    ("XDG_DATA_HOME", "AppData/Local"),
                    ("XDG_CACHE_HOME", "AppData/Local/cache"),
                    ("XDG_STATE_HOME", "AppData/Local/state"),
                ] {
                    if !env.has(key) {
                        env.set(key, &format!("{home}/{suffix}"));
                    }
                }
            }
        } else if let Some(home) = env.get("HOME").map(str::to_string) {
            for (key, suffix) in [
                ("XDG_CONFIG_HOME", ".config"),
                ("XDG_DATA_HOME", ".local/share"),
                ("XDG_CACHE_HOME", ".cache"),
                ("XDG_STATE_HOME", ".local/state"),
            ] {
                if !env.has(key) {
                    env.set(key, &format!("{home}/{suffix}"));
                }
            }
        }
    }

    fn inject_runner_keys(&self, env: &mut EnvStore, _task_id: &str) -> Result<()> {
        let run_file = self.model.source_path.clone();
        let run_dir = self.run_root.clone();

        env.set("RUN_FILE", &run_file.to_string_lossy());
        env.set("RUN_DIR", &run_dir.to_string_lossy());
        env.set("RUN_ROOT_FILE", &run_file.to_string_lossy());
        env.set("RUN_ROOT_DIR", &run_dir.to_string_lossy());
        env.set("RUN_CONTEXT", &self.context);
        env.set("RUN_SHELL", self.model.config.shell.as_deref().unwrap_or("shell"));
        env.set("RUN_VERSION", self.version);

        if let Some(dirs) = ProjectDirs::from("dev", "runweave", "runweave") {
            env.set(
                "RUN_ETC_DIR",
                &self
                    .model
                    .config
                    .dirs
                    .etc
                    .clone()
                    .unwrap_or_else(|| run_dir.join("etc"))
                    .to_string_lossy(),
            );
            env.set("RUN_CONFIG_HOME", &dirs.config_dir().to_string_lossy());
            env.set("RUN_DATA_HOME", &dirs.data_dir().to_string_lossy());
            env.set("RUN_CACHE_HOME", &dirs.cache_dir().to_string_lossy());
            env.set(
                "RUN_STATE_HOME",
                &dirs
                    .state_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.data_dir().join("state"))
                    .to_string_lossy(),
            );
        }
        env.set(
            "RUN_PROJECTS_DIRS",
            &self
                .model
                .config
                .dirs
                .projects
                .clone()
                .unwrap_or_else(|| run_dir.clone())
                .to_string_lossy(),
        );

        Ok(())
    }

    fn apply_config_paths(&self, env: &mut EnvStore, config: &RunfileConfig) -> Result<()> {
        let expander = Expander::new(false);
        for entry in &config.paths {
            if let Some(os) = &entry.os {
                if !os.eq_ignore_ascii_case(std::env::consts::OS) {
                    continue;
                }
            }
            let expanded = expander.expand(&entry.path, env)?;
            env.prepend_path(&expanded);
        }
        Ok(())
    }

    /// User-config-dir, etc-dir, root dir, run-file-declared files,
    /// task-declared files, in that order, each overlaid through the
    /// Expander so later files see earlier values.
    fn apply_dotenv_cascade(&self, env: &mut EnvStore, task: &Task) -> Result<()> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(config_home) = env.get("RUN_CONFIG_HOME").map(str::to_string) {
            candidates.push(format!("{config_home}/.env?"));
        }
        if let Some(etc_dir) = env.get("RUN_ETC_DIR").map(str::to_string) {
            candidates.push(format!("{etc_dir}/.env?"));
        }
        candidates.push(format!("{}/.env?", self.run_root.to_string_lossy()));
        candidates.extend(self.model.dotenv.0.clone());
        candidates.extend(task.dotenv.0.clone());

        for candidate in candidates {
            let (path_str, optional) = match candidate.strip_suffix('?') {
                Some(stripped) => (stripped.to_string(), true),
                None => (candidate, false),
            };
            let expander = Expander::new(false);
            let expanded = expander.expand(&path_str, env)?;
            let path = self.run_root.join(&expanded);
            let path = if Path::new(&expanded).is_absolute() {
                PathBuf::from(&expanded)
            } else {
                path
            };

            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    let doc = DotEnvDocument::parse(&text);
                    doc.overlay_expanded(env)?;
                }
                Err(_) if optional => {}
                Err(_) => return Err(RunError::DotEnvMissing { path }),
            }
        }
        Ok(())
    }

    fn apply_overlay(&self, env: &mut EnvStore, overlay: &EnvOverlay) -> Result<()> {
        let expander = Expander::new(false);
        for entry in &overlay.0 {
            match entry {
                EnvEntry::Assign { key, value } => {
                    let expanded = expander.expand(value, env)?;
                    env.set(key, &expanded);
                }
                EnvEntry::SecretRef { key } => {
                    env.mark_secret(key);
                }
            }
        }
        Ok(())
    }

    /// Injects one `INPUT_<SCREAMING_CASE(id)>` per `task.with` entry (spec
    /// §6). The loader that turns a `with:` map into a concrete `Step` list
    /// is external to this engine, but the env-var contract it relies on
    /// isn't — it's produced here regardless.
    fn inject_inputs(&self, env: &mut EnvStore, task: &Task) {
        for (key, value) in &task.with {
            let var = format!("INPUT_{}", screaming_case(key));
            env.set(&var, &param_value_to_string(value));
        }
    }

    fn resolve_cwd(&self, env: &EnvStore, task: &Task) -> Result<PathBuf> {
        let expander = Expander::new(false);
        let mut scratch = env.clone();
        if let Some(cwd) = &task.cwd {
            let expanded = expander.expand(cwd.to_string_lossy().as_ref(), &mut scratch)?;
            return Ok(PathBuf::from(expanded));
        }
        if let Some(run_dir) = env.get("RUN_DIR") {
            return Ok(PathBuf::from(run_dir));
        }
        std::env::current_dir().map_err(RunError::Io)
    }

    /// Fold a completed task's `RUN_ENV`/`RUN_PATH` side channels back into
    /// the workflow's running environment, to be inherited by subsequent
    /// tasks (step 8 of §4.6). `RUN_*` keys are ignored except `RUN_*_EXE`.
    pub fn fold_back(env: &mut EnvStore, run_env_path: &Path, run_path_path: &Path) -> Result<()> {
        if let Ok(text) = std::fs::read_to_string(run_env_path) {
            let doc = DotEnvDocument::parse(&text);
            for (key, value) in doc.iter_vars() {
                if key.starts_with("RUN_") && !key.ends_with("_EXE") {
                    continue;
                }
                env.set(key, value);
            }
        }
        if let Ok(text) = std::fs::read_to_string(run_path_path) {
            for dir in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                env.prepend_path(dir);
            }
        }
        Ok(())
    }
}

fn temp_file(prefix: &str) -> Result<PathBuf> {
    let dir = std::env::temp_dir();
    let rand = format!("{:x}", std::process::id()) + &format!("{:x}", temp_counter());
    let path = dir.join(format!("{prefix}-{rand}"));
    std::fs::write(&path, b"")?;
    Ok(path)
}

fn temp_counter() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// `file-path` -> `FILE_PATH`: uppercase ASCII alphanumerics, everything
/// else collapses to `_`.
fn screaming_case(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn param_value_to_string(value: &ParamValue) -> String {
    match value {
        ParamValue::Item(s) => s.clone(),
        ParamValue::List(items) => items.join(","),
        ParamValue::Dict(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn model_with_source(yaml: &str, dir: &Path) -> RunfileModel {
        let path = dir.join("runweave.yaml");
        std::fs::write(&path, yaml).unwrap();
        RunfileModel::load(&path).unwrap()
    }

    #[test]
    fn composes_task_env_overlay_over_runfile_env() {
        let dir = tempdir().unwrap();
        let model = model_with_source(
            r#"
env:
  FOO: root
tasks:
  a:
    run: echo hi
    env:
      FOO: task
"#,
            dir.path(),
        );
        let composer = EnvComposer::new(&model, "default");
        let inherited = EnvStore::new();
        let task = &model.tasks["a"];
        let composed = composer.compose("a", task, &inherited).unwrap();
        assert_eq!(composed.env.get("FOO"), Some("task"));
    }

    #[test]
    fn dotenv_layering_scenario() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "PORT=80\n").unwrap();
        std::fs::write(dir.path().join(".env.prod"), "PORT=443\n").unwrap();

        let model = model_with_source(
            r#"
dotenv:
  - ./.env
  - "./.env.prod?"
tasks:
  a:
    run: echo hi
"#,
            dir.path(),
        );
        let composer = EnvComposer::new(&model, "prod");
        let task = &model.tasks["a"];
        let composed = composer.compose("a", task, &EnvStore::new()).unwrap();
        assert_eq!(composed.env.get("PORT"), Some("443"));
    }

    #[test]
    fn missing_required_dotenv_fails() {
        let dir = tempdir().unwrap();
        let model = model_with_source(
            r#"
dotenv:
  - ./.env.missing
tasks:
  a:
    run: echo hi
"#,
            dir.path(),
        );
        let composer = EnvComposer::new(&model, "default");
        let task = &model.tasks["a"];
        let err = composer.compose("a", task, &EnvStore::new()).unwrap_err();
        assert!(matches!(err, RunError::DotEnvMissing { .. }));
    }

    #[test]
    fn optional_dotenv_suffix_suppresses_error() {
        let dir = tempdir().unwrap();
        let model = model_with_source(
            r#"
dotenv:
  - "./.env.missing?"
tasks:
  a:
    run: echo hi
"#,
            dir.path(),
        );
        let composer = EnvComposer::new(&model, "default");
        let task = &model.tasks["a"];
        assert!(composer.compose("a", task, &EnvStore::new()).is_ok());
    }

    #[test]
    fn with_entries_inject_input_vars_in_screaming_case() {
        let dir = tempdir().unwrap();
        let model = model_with_source(
            r#"
tasks:
  a:
    run: echo hi
    with:
      file-path: a.txt
      tags: [one, two]
      labels:
        env: prod
"#,
            dir.path(),
        );
        let composer = EnvComposer::new(&model, "default");
        let task = &model.tasks["a"];
        let composed = composer.compose("a", task, &EnvStore::new()).unwrap();
        assert_eq!(composed.env.get("INPUT_FILE_PATH"), Some("a.txt"));
        assert_eq!(composed.env.get("INPUT_TAGS"), Some("one,two"));
        assert_eq!(composed.env.get("INPUT_LABELS"), Some("env=prod"));
    }

    #[test]
    fn run_step_keys_default_to_the_task_itself() {
        let dir = tempdir().unwrap();
        let model = model_with_source(
            r#"
tasks:
  build:
    name: Build it
    run: echo hi
"#,
            dir.path(),
        );
        let composer = EnvComposer::new(&model, "default");
        let task = &model.tasks["build"];
        let composed = composer.compose("build", task, &EnvStore::new()).unwrap();
        assert_eq!(composed.env.get("RUN_STEP_ID"), Some("build"));
        assert_eq!(composed.env.get("RUN_STEP_NAME"), Some("Build it"));
        assert_eq!(composed.env.get("RUN_STEP_INDEX"), Some("0"));
        assert_eq!(composed.env.get("RUN_STEP_CWD"), composed.env.get("RUN_TASK_CWD"));
    }

    #[test]
    fn fold_back_ignores_run_keys_except_exe_overrides() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join("run-env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "FOO=bar\nRUN_CONTEXT=ignored\nRUN_BASH_EXE=/custom/bash").unwrap();
        let path_path = dir.path().join("run-path");
        std::fs::write(&path_path, "/extra/bin\n").unwrap();

        let mut env = EnvStore::new();
        env.set("RUN_CONTEXT", "default");
        EnvComposer::fold_back(&mut env, &env_path, &path_path).unwrap();

        assert_eq!(env.get("FOO"), Some("bar"));
        assert_eq!(env.get("RUN_CONTEXT"), Some("default"));
        assert_eq!(env.get("RUN_BASH_EXE"), Some("/custom/bash"));
        assert_eq!(env.get_path().first().map(String::as_str), Some("/extra/bin"));
    }
}
