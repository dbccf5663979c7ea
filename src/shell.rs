//! A small, explicitly non-POSIX shell: variable/command substitution via
//! `Expander`, quote-aware tokenization, and `|`/`&&`/`||`/`;` sequencing.
//! Not a drop-in replacement for `sh` — no subshells, redirection operators,
//! globbing, or control-flow keywords.
//!
//! Generalizes the teacher's `Executor::parse_command` (`executor.rs`),
//! which only split on whitespace honoring quotes and always ran one
//! command at a time. This adds the operator layer and routes substitution
//! through `Expander` instead of relying on a real shell to do it.

use crate::env_store::EnvStore;
use crate::exec::{CancelToken, ExecutorFacade};
use crate::expander::Expander;
use crate::error::{RunError, Result};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
enum Connector {
    Pipe,
    And,
    Or,
    Seq,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Connector(Connector),
}

pub struct ShellInterpreter;

impl ShellInterpreter {
    /// Spec §4.9 entry point for a task's `run:` script: expand the whole
    /// script once, split into logical lines (continuation-joined,
    /// comments and blanks dropped), then run each line's statement chain
    /// in turn, stopping at the first line whose result is a failure.
    pub async fn run_script(
        script: &str,
        env: &mut EnvStore,
        cwd: &Path,
        cancel: &mut CancelToken,
    ) -> Result<i32> {
        let expander = Expander::new(true).with_cwd(&cwd.to_string_lossy());
        let expanded = expander.expand(script, env)?;

        let mut last = 0;
        for line in logical_lines(&expanded) {
            last = Self::run_tokenized(&line, env, cwd, cancel).await?;
            if last != 0 {
                break;
            }
        }
        Ok(last)
    }

    /// Expand a single already-isolated line against `env`, tokenize, and
    /// run it, returning the exit code of the last command actually
    /// executed (control operators may skip later commands).
    pub async fn run(
        line: &str,
        env: &mut EnvStore,
        cwd: &Path,
        cancel: &mut CancelToken,
    ) -> Result<i32> {
        let expander = Expander::new(true).with_cwd(&cwd.to_string_lossy());
        let expanded = expander.expand(line, env)?;
        Self::run_tokenized(&expanded, env, cwd, cancel).await
    }

    async fn run_tokenized(
        expanded: &str,
        env: &mut EnvStore,
        cwd: &Path,
        cancel: &mut CancelToken,
    ) -> Result<i32> {
        let tokens = tokenize(expanded)?;
        let statements = group(tokens);

        let mut last_code = 0;
        let mut skip_next = false;

        for (idx, (pipeline, connector)) in statements.iter().enumerate() {
            if idx > 0 {
                let prev_connector = &statements[idx - 1].1;
                skip_next = match prev_connector {
                    Connector::And => last_code != 0,
                    Connector::Or => last_code == 0,
                    Connector::Seq | Connector::Pipe => false,
                };
            }

            if skip_next {
                continue;
            }

            let stages: Vec<(String, Vec<String>)> = pipeline
                .iter()
                .map(|words| {
                    let mut iter = words.iter().cloned();
                    let program = iter.next().unwrap_or_default();
                    (program, iter.collect())
                })
                .collect();

            if stages.is_empty() || stages[0].0.is_empty() {
                continue;
            }

            last_code = ExecutorFacade::spawn_pipeline(&stages, cwd, env, cancel).await?;
            let _ = connector;
        }

        Ok(last_code)
    }
}

/// Splits an already-expanded script into logical command lines: each
/// source line is trimmed, blank lines and `#`-prefixed comments are
/// dropped, and a line ending in `\` or a backtick is joined with the next
/// (the continuation marker itself is dropped, a single space separates
/// the joined halves).
fn logical_lines(script: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();

    for raw in script.lines() {
        let trimmed = raw.trim();
        if pending.is_empty() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }

        if let Some(stripped) = trimmed.strip_suffix('\\') {
            if !pending.is_empty() {
                pending.push(' ');
            }
            pending.push_str(stripped.trim_end());
            continue;
        }
        if trimmed.ends_with('`') {
            // An unterminated backtick opens a multi-line command
            // substitution; keep the backtick itself, only the backslash
            // marker is a pure continuation that gets dropped.
            if !pending.is_empty() {
                pending.push(' ');
            }
            pending.push_str(trimmed);
            continue;
        }

        if !pending.is_empty() {
            pending.push(' ');
            pending.push_str(trimmed);
            lines.push(std::mem::take(&mut pending));
        } else {
            lines.push(trimmed.to_string());
        }
    }
    if !pending.is_empty() {
        lines.push(pending);
    }
    lines
}

fn tokenize(s: &str) -> Result<Vec<Tok>> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    let mut current = String::new();
    let mut in_word = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for c2 in chars.by_ref() {
                    if c2 == '\'' {
                        break;
                    }
                    current.push(c2);
                }
            }
            '"' => {
                in_word = true;
                while let Some(c2) = chars.next() {
                    if c2 == '"' {
                        break;
                    }
                    if c2 == '\\' {
                        if let Some(&next) = chars.peek() {
                            if next == '"' || next == '\\' {
                                current.push(chars.next().unwrap());
                                continue;
                            }
                        }
                    }
                    current.push(c2);
                }
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    tokens.push(Tok::Word(std::mem::take(&mut current)));
                    in_word = false;
                }
            }
            '|' => {
                flush_word(&mut tokens, &mut current, &mut in_word);
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Tok::Connector(Connector::Or));
                } else {
                    tokens.push(Tok::Connector(Connector::Pipe));
                }
            }
            '&' => {
                flush_word(&mut tokens, &mut current, &mut in_word);
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Tok::Connector(Connector::And));
                } else {
                    return Err(RunError::Expansion {
                        text: s.to_string(),
                        reason: "background execution ('&') is not supported".into(),
                    });
                }
            }
            ';' => {
                flush_word(&mut tokens, &mut current, &mut in_word);
                tokens.push(Tok::Connector(Connector::Seq));
            }
            _ => {
                current.push(c);
                in_word = true;
            }
        }
    }
    flush_word(&mut tokens, &mut current, &mut in_word);

    Ok(tokens)
}

fn flush_word(tokens: &mut Vec<Tok>, current: &mut String, in_word: &mut bool) {
    if *in_word {
        tokens.push(Tok::Word(std::mem::take(current)));
        *in_word = false;
    }
}

/// Groups tokens into `(pipeline, trailing connector)` pairs, where each
/// pipeline is a `Vec` of argv stages split on `|`. The connector attached
/// to a statement is the one that *follows* it (`Seq` for the last one).
fn group(tokens: Vec<Tok>) -> Vec<(Vec<Vec<String>>, Connector)> {
    let mut statements = Vec::new();
    let mut pipeline: Vec<Vec<String>> = vec![Vec::new()];

    for tok in tokens {
        match tok {
            Tok::Word(w) => pipeline.last_mut().unwrap().push(w),
            Tok::Connector(Connector::Pipe) => pipeline.push(Vec::new()),
            Tok::Connector(c) => {
                statements.push((std::mem::replace(&mut pipeline, vec![Vec::new()]), c));
            }
        }
    }
    if pipeline.iter().any(|stage| !stage.is_empty()) {
        statements.push((pipeline, Connector::Seq));
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_quoted_words_and_operators() {
        let tokens = tokenize(r#"echo "hello world" | cat && echo done"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Tok::Word("echo".into()),
                Tok::Word("hello world".into()),
                Tok::Connector(Connector::Pipe),
                Tok::Word("cat".into()),
                Tok::Connector(Connector::And),
                Tok::Word("echo".into()),
                Tok::Word("done".into()),
            ]
        );
    }

    #[test]
    fn groups_pipeline_and_sequence_statements() {
        let tokens = tokenize("a | b ; c && d").unwrap();
        let statements = group(tokens);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].0, vec![vec!["a".to_string()], vec!["b".to_string()]]);
        assert_eq!(statements[0].1, Connector::Seq);
        assert_eq!(statements[1].0, vec![vec!["c".to_string()]]);
    }

    #[test]
    fn rejects_background_operator() {
        let err = tokenize("sleep 5 &").unwrap_err();
        assert!(matches!(err, RunError::Expansion { .. }));
    }

    #[tokio::test]
    async fn runs_a_simple_sequence() {
        use crate::exec::CancelHandle;
        let mut env = EnvStore::from_process_env();
        let (_, mut token) = CancelHandle::new();
        let cwd = std::env::current_dir().unwrap();
        let code = ShellInterpreter::run("true ; true", &mut env, &cwd, &mut token)
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn and_chain_short_circuits_on_failure() {
        use crate::exec::CancelHandle;
        let mut env = EnvStore::from_process_env();
        let (_, mut token) = CancelHandle::new();
        let cwd = std::env::current_dir().unwrap();
        let code = ShellInterpreter::run("false && true", &mut env, &cwd, &mut token)
            .await
            .unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn or_after_failed_and_chain_still_runs() {
        use crate::exec::CancelHandle;
        let mut env = EnvStore::from_process_env();
        let (_, mut token) = CancelHandle::new();
        let cwd = std::env::current_dir().unwrap();
        // `false && true` fails, so the `||` branch must run and the
        // overall result must be success.
        let code = ShellInterpreter::run("false && true || true", &mut env, &cwd, &mut token)
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn logical_lines_drops_comments_and_blanks() {
        let lines = logical_lines(
            "echo one\n# a comment\n\necho two\n",
        );
        assert_eq!(lines, vec!["echo one".to_string(), "echo two".to_string()]);
    }

    #[test]
    fn logical_lines_joins_backslash_continuation() {
        let lines = logical_lines("echo one \\\n  two\n");
        assert_eq!(lines, vec!["echo one two".to_string()]);
    }
}
