//! Typed in-memory form of the YAML run-file: tasks, hosts, config, imports.
//!
//! Generalizes the teacher's `config.rs` (`Config`/`TaskConfig`/`Settings`,
//! TOML, flat `HashMap`) to the spec's YAML schema with an ordered task
//! table, alias handling, and the richer per-task fields (`uses`, `with`,
//! `hosts`, `hooks`, `if`/`condition`). Field names and the merge/import
//! rules follow the original `internal/schema/{runfile,runfile_config,task,
//! hosts,env,import}.go`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{RunError, Result};

/// One run-file `env`/`dotenv`/`with` entry in sequence form: either a
/// `KEY=value` assignment or a bare `KEY:secret` declaration that marks an
/// already-present key (typically inherited from the process environment)
/// as secret without assigning it a literal value here.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvEntry {
    Assign { key: String, value: String },
    SecretRef { key: String },
}

/// Environment overlay accepting both the sequence form (`- KEY=val`,
/// `- KEY:secret`) and the mapping form (`KEY: val`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverlay(pub Vec<EnvEntry>);

impl<'de> Deserialize<'de> for EnvOverlay {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Map(IndexMap<String, String>),
            List(Vec<String>),
        }

        let raw = Raw::deserialize(deserializer)?;
        let entries = match raw {
            Raw::Map(map) => map
                .into_iter()
                .map(|(key, value)| EnvEntry::Assign { key, value })
                .collect(),
            Raw::List(items) => items
                .into_iter()
                .map(|item| {
                    if let Some((key, value)) = item.split_once('=') {
                        EnvEntry::Assign {
                            key: key.trim().to_string(),
                            value: value.to_string(),
                        }
                    } else if let Some((key, marker)) = item.split_once(':') {
                        if marker.trim() == "secret" {
                            EnvEntry::SecretRef { key: key.trim().to_string() }
                        } else {
                            EnvEntry::Assign { key: key.trim().to_string(), value: marker.to_string() }
                        }
                    } else {
                        EnvEntry::SecretRef { key: item }
                    }
                })
                .collect(),
        };
        Ok(EnvOverlay(entries))
    }
}

/// Scalar or sequence of dotenv file paths; each entry may carry a trailing
/// `?` marking it optional (spec §4.6/B3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DotEnvList(pub Vec<String>);

impl<'de> Deserialize<'de> for DotEnvList {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => DotEnvList(vec![s]),
            Raw::Many(v) => DotEnvList(v),
        })
    }
}

/// `hooks.before`/`hooks.after`: absent, a boolean shortcut for the
/// default-named hook (`<task>:before`/`<task>:after`), a single suffix, or
/// a list of suffixes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookSpec(pub Vec<String>);

impl HookSpec {
    /// Returns the list of hook *suffixes* this spec names (e.g. `setup` in
    /// `deploy:setup`), substituting `default_suffix` (`"before"` or
    /// `"after"`) for the boolean shorthand. The caller composes the full
    /// hook task id as `"<owning-task-id>:<suffix>"`.
    pub fn resolve(&self, default_suffix: &str) -> Vec<String> {
        self.0
            .clone()
            .into_iter()
            .map(|s| if s.is_empty() { default_suffix.to_string() } else { s })
            .collect()
    }
}

impl<'de> Deserialize<'de> for HookSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            One(String),
            Many(Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => HookSpec(vec![String::new()]),
            Raw::Flag(false) => HookSpec(vec![]),
            Raw::One(s) => HookSpec(vec![s]),
            Raw::Many(v) => HookSpec(v),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub before: HookSpec,
    #[serde(default)]
    pub after: HookSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Item(String),
    List(Vec<String>),
    Dict(IndexMap<String, String>),
}

/// A task definition as decoded straight from YAML, before GraphResolver
/// adds any `:context` specialization.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    #[serde(skip)]
    pub id: String,
    pub name: Option<String>,
    #[serde(default, alias = "description")]
    pub desc: Option<String>,
    pub help: Option<String>,
    #[serde(default)]
    pub env: EnvOverlay,
    #[serde(default, alias = "dot-env", alias = "dot_env")]
    pub dotenv: DotEnvList,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<String>,
    pub run: Option<String>,
    pub uses: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, alias = "deps", alias = "dependencies")]
    pub needs: Vec<String>,
    #[serde(default, alias = "input", alias = "inputs")]
    pub with: IndexMap<String, ParamValue>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default, alias = "condition")]
    pub r#if: Option<String>,
    #[serde(default)]
    pub force: Option<String>,
    #[serde(default)]
    pub hooks: Hooks,
}

impl Task {
    /// Build a clone specialized for `context`, with id `"<id>:<context>"`.
    /// Used by GraphResolver when a `T:<context>` variant is synthesized
    /// from a task that only declares the bare id but is being resolved
    /// under a non-default context (the common case: most tasks don't
    /// declare per-context variants at all).
    pub fn specialized_id(id: &str, context: &str) -> String {
        format!("{id}:{context}")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub address: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    #[serde(default)]
    pub password_var: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    pub os: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HostGroup {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathEntry {
    pub path: String,
    #[serde(default)]
    pub os: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dirs {
    pub etc: Option<PathBuf>,
    pub projects: Option<PathBuf>,
    pub scripts: Option<PathBuf>,
    pub bin: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunfileConfig {
    pub shell: Option<String>,
    pub context: Option<String>,
    #[serde(default)]
    pub paths: Vec<PathEntry>,
    #[serde(default)]
    pub dirs: Dirs,
    #[serde(default)]
    pub env: EnvOverlay,
    #[serde(default = "default_true")]
    pub substitution: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportEntry {
    pub path: PathBuf,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportSpec {
    #[serde(default)]
    pub tasks: Vec<ImportEntry>,
}

/// Root run-file document.
#[derive(Debug, Clone, Deserialize)]
pub struct RunfileModel {
    pub name: Option<String>,
    #[serde(default)]
    pub config: RunfileConfig,
    #[serde(default)]
    pub env: EnvOverlay,
    #[serde(default, alias = "dot-env", alias = "dot_env")]
    pub dotenv: DotEnvList,
    #[serde(default)]
    pub tasks: IndexMap<String, Task>,
    #[serde(default)]
    pub hosts: IndexMap<String, HostEntry>,
    #[serde(default, rename = "host-imports")]
    pub host_imports: Vec<PathBuf>,
    #[serde(default)]
    pub values: IndexMap<String, String>,
    #[serde(default)]
    pub import: ImportSpec,

    #[serde(skip)]
    pub source_path: PathBuf,
}

impl RunfileModel {
    /// Decode a run-file from `path`, assign each task its id, and merge in
    /// every `import.tasks`/`host-imports` entry (checksum-verified when a
    /// checksum is present).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut model = Self::from_str(&text, path)?;
        model.source_path = path.to_path_buf();
        model.resolve_imports(path.parent().unwrap_or_else(|| Path::new(".")))?;
        Ok(model)
    }

    pub fn from_str(text: &str, path: &Path) -> Result<Self> {
        let mut model: RunfileModel =
            serde_yaml::from_str(text).map_err(|source| RunError::ConfigParse {
                source,
                path: path.to_path_buf(),
            })?;
        for (id, task) in model.tasks.iter_mut() {
            task.id = id.clone();
        }
        Ok(model)
    }

    fn resolve_imports(&mut self, base_dir: &Path) -> Result<()> {
        for import in self.import.tasks.clone() {
            let full_path = base_dir.join(&import.path);
            let text = std::fs::read_to_string(&full_path)?;
            if let Some(expected) = &import.checksum {
                let mut hasher = Sha256::new();
                hasher.update(text.as_bytes());
                let actual = hex::encode(hasher.finalize());
                if &actual != expected {
                    return Err(RunError::ImportChecksumMismatch {
                        path: full_path,
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
            let imported = Self::from_str(&text, &full_path)?;
            for (id, task) in imported.tasks {
                if self.tasks.contains_key(&id) {
                    return Err(RunError::DuplicateImportedTask { id, path: full_path });
                }
                self.tasks.insert(id, task);
            }
        }
        for host_import in self.host_imports.clone() {
            let full_path = base_dir.join(&host_import);
            let text = std::fs::read_to_string(&full_path)?;
            let imported = Self::from_str(&text, &full_path)?;
            for (name, host) in imported.hosts {
                self.hosts.entry(name).or_insert(host);
            }
        }
        Ok(())
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn host_groups(&self) -> IndexMap<String, HostGroup> {
        let mut groups: IndexMap<String, HostGroup> = IndexMap::new();
        for (name, host) in &self.hosts {
            for g in &host.groups {
                groups
                    .entry(g.clone())
                    .or_insert_with(|| HostGroup { name: g.clone(), members: vec![] })
                    .members
                    .push(name.clone());
            }
            groups
                .entry(name.clone())
                .or_insert_with(|| HostGroup { name: name.clone(), members: vec![] })
                .members
                .push(name.clone());
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_runfile() {
        let yaml = r#"
name: demo
tasks:
  build:
    run: echo building
  deploy:
    needs: [build]
    desc: deploy it
"#;
        let model = RunfileModel::from_str(yaml, Path::new("runweave.yaml")).unwrap();
        assert_eq!(model.name.as_deref(), Some("demo"));
        assert_eq!(model.tasks["build"].run.as_deref(), Some("echo building"));
        assert_eq!(model.tasks["deploy"].needs, vec!["build".to_string()]);
        assert_eq!(model.tasks["build"].id, "build");
    }

    #[test]
    fn accepts_needs_aliases() {
        let yaml = r#"
tasks:
  a:
    run: x
  b:
    dependencies: [a]
"#;
        let model = RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap();
        assert_eq!(model.tasks["b"].needs, vec!["a".to_string()]);
    }

    #[test]
    fn accepts_desc_and_condition_aliases() {
        let yaml = r#"
tasks:
  a:
    description: does a thing
    condition: "env(\"CI\") == \"\""
"#;
        let model = RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap();
        assert_eq!(model.tasks["a"].desc.as_deref(), Some("does a thing"));
        assert!(model.tasks["a"].r#if.is_some());
    }

    #[test]
    fn env_accepts_sequence_and_mapping_forms() {
        let yaml = r#"
tasks:
  a:
    run: x
    env:
      - FOO=bar
      - SECRET_TOKEN:secret
  b:
    run: y
    env:
      FOO: bar
"#;
        let model = RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap();
        assert_eq!(
            model.tasks["a"].env.0,
            vec![
                EnvEntry::Assign { key: "FOO".into(), value: "bar".into() },
                EnvEntry::SecretRef { key: "SECRET_TOKEN".into() },
            ]
        );
        assert_eq!(
            model.tasks["b"].env.0,
            vec![EnvEntry::Assign { key: "FOO".into(), value: "bar".into() }]
        );
    }

    #[test]
    fn dotenv_accepts_scalar_and_sequence() {
        let yaml = r#"
dotenv: ./.env
tasks:
  a:
    run: x
    dotenv: [./.env.local, "./.env.prod?"]
"#;
        let model = RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap();
        assert_eq!(model.dotenv.0, vec!["./.env".to_string()]);
        assert_eq!(
            model.tasks["a"].dotenv.0,
            vec!["./.env.local".to_string(), "./.env.prod?".to_string()]
        );
    }

    #[test]
    fn dotenv_accepts_dash_and_underscore_aliases() {
        let yaml = r#"
dot-env: ./.env
tasks:
  a:
    run: x
    dot_env: ./.env.local
"#;
        let model = RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap();
        assert_eq!(model.dotenv.0, vec!["./.env".to_string()]);
        assert_eq!(model.tasks["a"].dotenv.0, vec!["./.env.local".to_string()]);
    }

    #[test]
    fn hooks_accept_bool_string_and_list() {
        let yaml = r#"
tasks:
  deploy:
    run: x
    hooks:
      before: true
      after: [cleanup, notify]
"#;
        let model = RunfileModel::from_str(yaml, Path::new("r.yaml")).unwrap();
        let deploy = &model.tasks["deploy"];
        assert_eq!(deploy.hooks.before.resolve("before"), vec!["before".to_string()]);
        assert_eq!(deploy.hooks.after.0, vec!["cleanup".to_string(), "notify".to_string()]);
    }
}
