//! Error taxonomy for the workflow engine.
//!
//! Uses `miette` for pretty error reporting with help text, following the
//! same `thiserror` + `miette::Diagnostic` shape the rest of this crate's
//! ancestry (`YatrError`) used, generalized to the kinds the spec names.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunError>;

/// Every fallible outcome the engine can produce, grouped the way the
/// component design groups them: config / resolver / env / dispatch /
/// handler / cancel.
#[derive(Error, Diagnostic, Debug)]
pub enum RunError {
    #[error("no run-file found")]
    #[diagnostic(
        code(runweave::config::not_found),
        help("create a runweave.yaml in your project root, or specify one with --file")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("failed to parse run-file {path}")]
    #[diagnostic(code(runweave::config::parse))]
    ConfigParse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[error("run-file schema error: {reason}")]
    #[diagnostic(code(runweave::config::schema))]
    ConfigSchema { reason: String },

    #[error("checksum mismatch importing {path}")]
    #[diagnostic(code(runweave::config::checksum))]
    ImportChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("duplicate task id '{id}' between root run-file and import {path}")]
    #[diagnostic(code(runweave::config::duplicate_task))]
    DuplicateImportedTask { id: String, path: PathBuf },

    #[error("target '{name}' not found")]
    #[diagnostic(
        code(runweave::resolver::target_not_found),
        help("run `runweave list` to see available tasks")
    )]
    TargetNotFound { name: String, available: Vec<String> },

    #[error("cyclical dependency: {}", cycle.join(" -> "))]
    #[diagnostic(code(runweave::resolver::cycle))]
    CyclicReference { cycle: Vec<String> },

    #[error("required dotenv file not found: {}", path.display())]
    #[diagnostic(code(runweave::env::dotenv_missing))]
    DotEnvMissing { path: PathBuf },

    #[error("failed to expand '{text}': {reason}")]
    #[diagnostic(code(runweave::env::expansion))]
    Expansion { text: String, reason: String },

    #[error("could not resolve path '{path}': {reason}")]
    #[diagnostic(code(runweave::env::path_resolve))]
    PathResolve { path: String, reason: String },

    #[error("unknown handler '{handler}'")]
    #[diagnostic(
        code(runweave::dispatch::unknown_handler),
        help("recognized handlers: shell, bash, sh, pwsh, powershell, nu, python, ruby, node, deno, bun, go, dotnet, ssh, scp, tmpl, docker, compose")
    )]
    UnknownHandler { handler: String },

    #[error("task '{task}' failed with exit code {exit_code}")]
    #[diagnostic(code(runweave::handler::task_run))]
    TaskRun {
        task: String,
        exit_code: i32,
        #[help]
        stderr_tail: Option<String>,
    },

    #[error("failed to launch '{executable}'")]
    #[diagnostic(code(runweave::handler::launch))]
    Launch {
        executable: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("condition expression failed to evaluate: {reason}")]
    #[diagnostic(code(runweave::handler::condition))]
    ConditionEval { reason: String },

    #[error("cancelled")]
    #[diagnostic(code(runweave::cancel))]
    Cancelled,

    #[error(transparent)]
    #[diagnostic(code(runweave::io))]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Every handled error kind maps to exit code 1 per the external
    /// interface contract; child exit codes are never forwarded.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
