//! Process spawn wrapper: single commands, output capture, and linear
//! pipelines, all cancellation-aware.
//!
//! Generalizes the teacher's `Executor::execute_command` (`executor.rs`),
//! which spawns one `tokio::process::Command` at a time with piped
//! stdout/stderr. This module keeps that spawn shape but adds a pipeline
//! variant (`ShellInterpreter` needs N processes linearly piped) and a
//! cancellation context instead of relying on the caller's `tokio::spawn`
//! alone to be abortable.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::env_store::EnvStore;
use crate::error::{RunError, Result};

/// Cooperative cancellation signal threaded through a running task. Cloning
/// shares the same underlying flag.
#[derive(Clone)]
pub struct CancelToken(tokio::sync::watch::Receiver<bool>);

pub struct CancelHandle(tokio::sync::watch::Sender<bool>);

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Self(tx), CancelToken(rx))
    }

    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }

    /// A fresh view of the same cancellation flag — cancelling this handle
    /// cancels every token it has issued.
    pub fn token(&self) -> CancelToken {
        CancelToken(self.0.subscribe())
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    async fn cancelled(&mut self) {
        let _ = self.0.changed().await;
    }
}

/// Outcome of a single finished process.
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct ExecutorFacade;

impl ExecutorFacade {
    /// Spawn `program` with `args`, streaming stdout/stderr to the parent
    /// process (interactive use — `run`).
    pub async fn spawn_inherited(
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &EnvStore,
        cancel: &mut CancelToken,
    ) -> Result<i32> {
        let mut command = Self::build(program, args, cwd, env);
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let mut child = command.spawn().map_err(|cause| RunError::Launch {
            executable: program.to_string(),
            cause,
        })?;

        Self::wait_with_cancel(&mut child, cancel).await
    }

    /// Spawn and capture stdout/stderr instead of inheriting them — used by
    /// `$(cmd)` substitution and any handler that needs the output text.
    pub async fn spawn_captured(
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &EnvStore,
    ) -> Result<ExecOutput> {
        let mut command = Self::build(program, args, cwd, env);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let child = command.spawn().map_err(|cause| RunError::Launch {
            executable: program.to_string(),
            cause,
        })?;

        let output = child.wait_with_output().await.map_err(|cause| RunError::Launch {
            executable: program.to_string(),
            cause,
        })?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run `stages` as a linear pipeline: stage N's stdout feeds stage N+1's
    /// stdin. Returns the last stage's exit code, matching POSIX pipeline
    /// semantics (earlier stages' failures are visible only via `PIPESTATUS`
    /// equivalents the shell interpreter tracks separately, not here).
    pub async fn spawn_pipeline(
        stages: &[(String, Vec<String>)],
        cwd: &Path,
        env: &EnvStore,
        cancel: &mut CancelToken,
    ) -> Result<i32> {
        if stages.is_empty() {
            return Ok(0);
        }
        if stages.len() == 1 {
            let (program, args) = &stages[0];
            return Self::spawn_inherited(program, args, cwd, env, cancel).await;
        }

        let mut children: Vec<Child> = Vec::with_capacity(stages.len());
        let mut prev_stdout: Option<tokio::process::ChildStdout> = None;

        for (idx, (program, args)) in stages.iter().enumerate() {
            let is_last = idx == stages.len() - 1;
            let mut command = Self::build(program, args, cwd, env);

            command.stdin(match prev_stdout.take() {
                Some(_) => Stdio::piped(),
                None => Stdio::inherit(),
            });
            command.stdout(if is_last { Stdio::inherit() } else { Stdio::piped() });
            command.stderr(Stdio::inherit());

            let mut child = command.spawn().map_err(|cause| RunError::Launch {
                executable: program.to_string(),
                cause,
            })?;

            if let Some(mut upstream) = prev_stdout.take() {
                if let Some(mut stdin) = child.stdin.take() {
                    let mut buf = Vec::new();
                    upstream.read_to_end(&mut buf).await.map_err(RunError::Io)?;
                    stdin.write_all(&buf).await.map_err(RunError::Io)?;
                }
            }

            prev_stdout = child.stdout.take();
            children.push(child);
        }

        let mut last_code = 0;
        for (idx, mut child) in children.into_iter().enumerate() {
            let code = Self::wait_with_cancel(&mut child, cancel).await?;
            if idx == stages.len() - 1 {
                last_code = code;
            }
        }
        Ok(last_code)
    }

    fn build(program: &str, args: &[String], cwd: &Path, env: &EnvStore) -> Command {
        let mut command = Command::new(program);
        command.args(args).current_dir(cwd);
        command.env_clear();
        for (key, value) in env.iter() {
            command.env(key, value);
        }
        command
    }

    async fn wait_with_cancel(child: &mut Child, cancel: &mut CancelToken) -> Result<i32> {
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(RunError::Io)?;
                Ok(status.code().unwrap_or(-1))
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(RunError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::current_dir().unwrap()
    }

    #[tokio::test]
    async fn captures_stdout_of_a_simple_command() {
        let env = EnvStore::from_process_env();
        let (program, args) = shell_echo("hello");
        let out = ExecutorFacade::spawn_captured(&program, &args, &cwd(), &env)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_without_erroring_capture() {
        let env = EnvStore::from_process_env();
        let (program, args) = shell_run("exit 7");
        let out = ExecutorFacade::spawn_captured(&program, &args, &cwd(), &env)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 7);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn cancellation_stops_a_long_running_process() {
        let env = EnvStore::from_process_env();
        let (handle, mut token) = CancelHandle::new();
        let (program, args) = shell_run("sleep 30");
        handle.cancel();
        let result = ExecutorFacade::spawn_inherited(&program, &args, &cwd(), &env, &mut token).await;
        assert!(matches!(result, Err(RunError::Cancelled)));
    }

    fn shell_echo(text: &str) -> (String, Vec<String>) {
        shell_run(&format!("echo {text}"))
    }

    fn shell_run(script: &str) -> (String, Vec<String>) {
        if cfg!(windows) {
            ("cmd".to_string(), vec!["/C".to_string(), script.to_string()])
        } else {
            ("sh".to_string(), vec!["-c".to_string(), script.to_string()])
        }
    }
}
