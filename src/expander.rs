//! Variable substitution and optional command substitution.
//!
//! No Go `internal/env` reference source was retrieved for this package —
//! spec §4.2 is authoritative. The scanning style (manual byte-index walk
//! over the input rather than a regex) follows the teacher's hand-rolled
//! `parse_command` tokenizer in `executor.rs`.

use std::process::Stdio;

use crate::error::{RunError, Result};

/// Binding the expander reads/writes against. Kept as a trait so callers
/// (EnvComposer, ShellInterpreter) can expand against an `EnvStore` or any
/// other key/value source without this module depending on `EnvStore`.
pub trait ExpandBinding {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
}

impl ExpandBinding for crate::env_store::EnvStore {
    fn get(&self, key: &str) -> Option<String> {
        crate::env_store::EnvStore::get(self, key).map(str::to_string)
    }
    fn set(&mut self, key: &str, value: &str) {
        crate::env_store::EnvStore::set(self, key, value)
    }
}

/// Runs an external command and returns its trimmed stdout, used for
/// `$(cmd)` substitution. A trait so tests can stub command execution.
pub trait CommandRunner {
    fn run(&self, command: &str, cwd: Option<&str>) -> Result<String>;
}

/// Default runner: a real subprocess through the platform shell.
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, command: &str, cwd: Option<&str>) -> Result<String> {
        let mut cmd = if cfg!(windows) {
            let mut c = std::process::Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = std::process::Command::new("sh");
            c.args(["-c", command]);
            c
        };
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        let output = cmd.output().map_err(|e| RunError::Expansion {
            text: command.to_string(),
            reason: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(RunError::Expansion {
                text: command.to_string(),
                reason: format!(
                    "command substitution exited with {}",
                    output.status.code().unwrap_or(-1)
                ),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.trim_end_matches('\n').to_string())
    }
}

pub struct Expander<'a> {
    pub command_substitution: bool,
    pub cwd: Option<&'a str>,
}

impl<'a> Default for Expander<'a> {
    fn default() -> Self {
        Self {
            command_substitution: false,
            cwd: None,
        }
    }
}

impl<'a> Expander<'a> {
    pub fn new(command_substitution: bool) -> Self {
        Self {
            command_substitution,
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: &'a str) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Expand `s` against `binding`. Single-pass: the expanded text is never
    /// re-scanned for further variable references.
    pub fn expand(&self, s: &str, binding: &mut dyn ExpandBinding) -> Result<String> {
        self.expand_with_runner(s, binding, &ProcessCommandRunner)
    }

    pub fn expand_with_runner(
        &self,
        s: &str,
        binding: &mut dyn ExpandBinding,
        runner: &dyn CommandRunner,
    ) -> Result<String> {
        let bytes = s.as_bytes();
        let mut out = String::with_capacity(s.len());
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            if b == b'$' && i + 1 < bytes.len() {
                let next = bytes[i + 1];
                if next == b'{' {
                    let (replacement, consumed) = self.expand_braced(&s[i..], binding)?;
                    out.push_str(&replacement);
                    i += consumed;
                    continue;
                } else if next == b'(' && self.command_substitution {
                    if let Some((inner, consumed)) = scan_balanced(&s[i + 2..], b'(', b')') {
                        let expanded_inner = self.expand_with_runner(&inner, binding, runner)?;
                        let result = runner.run(&expanded_inner, self.cwd)?;
                        out.push_str(&result);
                        i += 2 + consumed;
                        continue;
                    }
                } else if is_name_start(next) {
                    let (name, consumed) = scan_name(&s[i + 1..]);
                    let value = binding.get(&name).unwrap_or_default();
                    out.push_str(&value);
                    i += 1 + consumed;
                    continue;
                }
            }
            if b.is_ascii() {
                out.push(b as char);
                i += 1;
            } else {
                let ch = s[i..].chars().next().expect("valid utf8 boundary");
                out.push(ch);
                i += ch.len_utf8();
            }
        }

        Ok(out)
    }

    /// Handles `${NAME}`, `${NAME:-d}`, `${NAME:=d}`, `${NAME:+d}`, `${NAME:?m}`.
    /// Returns (replacement text, bytes consumed from the start of `s`, which
    /// begins at the `${`).
    fn expand_braced(
        &self,
        s: &str,
        binding: &mut dyn ExpandBinding,
    ) -> Result<(String, usize)> {
        let (body, consumed) = scan_balanced(&s[1..], b'{', b'}')
            .ok_or_else(|| RunError::Expansion {
                text: s.to_string(),
                reason: "unterminated ${...}".into(),
            })?;
        let total_consumed = 1 + consumed;

        if let Some(idx) = body.find(":-") {
            let (name, default) = (&body[..idx], &body[idx + 2..]);
            let value = binding.get(name);
            let out = match value {
                Some(v) if !v.is_empty() => v,
                _ => self.expand_with_runner(default, binding, &ProcessCommandRunner)?,
            };
            return Ok((out, total_consumed));
        }
        if let Some(idx) = body.find(":=") {
            let (name, default) = (&body[..idx], &body[idx + 2..]);
            let value = binding.get(name);
            let out = match value {
                Some(v) if !v.is_empty() => v,
                _ => {
                    let expanded = self.expand_with_runner(default, binding, &ProcessCommandRunner)?;
                    binding.set(name, &expanded);
                    expanded
                }
            };
            return Ok((out, total_consumed));
        }
        if let Some(idx) = body.find(":+") {
            let (name, alt) = (&body[..idx], &body[idx + 2..]);
            let value = binding.get(name);
            let out = match value {
                Some(v) if !v.is_empty() => self.expand_with_runner(alt, binding, &ProcessCommandRunner)?,
                _ => String::new(),
            };
            return Ok((out, total_consumed));
        }
        if let Some(idx) = body.find(":?") {
            let (name, msg) = (&body[..idx], &body[idx + 2..]);
            let value = binding.get(name);
            return match value {
                Some(v) if !v.is_empty() => Ok((v, total_consumed)),
                _ => Err(RunError::Expansion {
                    text: s.to_string(),
                    reason: if msg.is_empty() {
                        format!("{name}: required variable not set")
                    } else {
                        msg.to_string()
                    },
                }),
            };
        }

        let value = binding.get(body).unwrap_or_default();
        Ok((value, total_consumed))
    }
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn scan_name(s: &str) -> (String, usize) {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && is_name_char(bytes[i]) {
        i += 1;
    }
    (s[..i].to_string(), i)
}

/// Scans `s` (which begins just after an opening `open`) for the matching
/// `close`, honoring nesting. Returns (inner text, bytes consumed including
/// the trailing `close`).
fn scan_balanced(s: &str, open: u8, close: u8) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    let mut depth = 1usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == open {
            depth += 1;
        } else if bytes[i] == close {
            depth -= 1;
            if depth == 0 {
                return Some((s[..i].to_string(), i + 1));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_store::EnvStore;

    fn store(pairs: &[(&str, &str)]) -> EnvStore {
        let mut s = EnvStore::new();
        for (k, v) in pairs {
            s.set(k, v);
        }
        s
    }

    #[test]
    fn expands_simple_and_braced_forms() {
        let mut env = store(&[("NAME", "world")]);
        let expander = Expander::new(false);
        assert_eq!(expander.expand("hi $NAME", &mut env).unwrap(), "hi world");
        assert_eq!(expander.expand("hi ${NAME}!", &mut env).unwrap(), "hi world!");
    }

    #[test]
    fn default_and_assign_forms() {
        let mut env = store(&[]);
        let expander = Expander::new(false);
        assert_eq!(expander.expand("${FOO:-bar}", &mut env).unwrap(), "bar");
        assert_eq!(expander.expand("${FOO:=bar}", &mut env).unwrap(), "bar");
        assert_eq!(env.get("FOO"), Some("bar"));
    }

    #[test]
    fn alt_form_only_fires_when_set() {
        let mut env = store(&[("SET", "1")]);
        let expander = Expander::new(false);
        assert_eq!(expander.expand("${SET:+yes}", &mut env).unwrap(), "yes");
        assert_eq!(expander.expand("${UNSET:+yes}", &mut env).unwrap(), "");
    }

    #[test]
    fn required_form_errors_when_missing() {
        let mut env = store(&[]);
        let expander = Expander::new(false);
        let err = expander.expand("${MUST:?custom message}", &mut env).unwrap_err();
        assert!(matches!(err, RunError::Expansion { reason, .. } if reason == "custom message"));
    }

    #[test]
    fn idempotent_on_pure_variable_refs_once_defined() {
        let mut env = store(&[("A", "1"), ("B", "2")]);
        let expander = Expander::new(false);
        let once = expander.expand("$A-$B", &mut env).unwrap();
        let twice = expander.expand(&once, &mut env).unwrap();
        assert_eq!(once, twice);
    }

    struct StubRunner(&'static str);
    impl CommandRunner for StubRunner {
        fn run(&self, _command: &str, _cwd: Option<&str>) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn command_substitution_trims_trailing_newlines() {
        let mut env = store(&[]);
        let expander = Expander::new(true);
        let runner = StubRunner("hello\n");
        let out = expander
            .expand_with_runner("say: $(echo hello)", &mut env, &runner)
            .unwrap();
        assert_eq!(out, "say: hello");
    }

    #[test]
    fn command_substitution_disabled_is_left_literal() {
        let mut env = store(&[]);
        let expander = Expander::new(false);
        let out = expander.expand("$(echo hi)", &mut env).unwrap();
        assert_eq!(out, "$(echo hi)");
    }
}
