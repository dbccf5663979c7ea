//! Ordered `KEY=VALUE` document parser/merger.
//!
//! Grounded on spec §4.3; the ordered-token-list shape (rather than
//! collapsing straight into a `HashMap`) mirrors `adrianmrit-yamis`'s choice
//! of `dotenv-parser` and vercel-turborepo's `turbo-tasks-env/src/dotenv.rs`,
//! both of which keep dotenv documents as an ordered structure rather than
//! an unordered map.

use crate::env_store::EnvStore;
use crate::expander::{Expander, ExpandBinding};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `literal` is `true` for a single-quoted value (spec §4.3: taken
    /// verbatim, never expanded) and `false` for double-quoted or bare
    /// values (expanded on read in `overlay_expanded`).
    Variable { key: String, value: String, literal: bool },
    Comment(String),
    Blank,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DotEnvDocument {
    pub tokens: Vec<Token>,
}

impl DotEnvDocument {
    pub fn parse(text: &str) -> Self {
        let mut tokens = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                tokens.push(Token::Blank);
                continue;
            }
            if trimmed.starts_with('#') {
                tokens.push(Token::Comment(trimmed.to_string()));
                continue;
            }
            let Some((key, raw_value)) = trimmed.split_once('=') else {
                tokens.push(Token::Comment(trimmed.to_string()));
                continue;
            };
            let key = key.trim().trim_start_matches("export ").trim();
            let (value, literal) = parse_value(raw_value.trim());
            tokens.push(Token::Variable {
                key: key.to_string(),
                value,
                literal,
            });
        }
        Self { tokens }
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Variable { key, value, literal } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote_if_needed(value, *literal));
                    out.push('\n');
                }
                Token::Comment(c) => {
                    out.push_str(c);
                    out.push('\n');
                }
                Token::Blank => out.push('\n'),
            }
        }
        out
    }

    /// Left-preserving merge: keeps `self`'s ordering, overwrites values on
    /// key collision with `other`'s value, and appends `other`'s new keys
    /// at the end in their own order.
    pub fn merge(mut self, other: &DotEnvDocument) -> Self {
        for token in &other.tokens {
            if let Token::Variable { key, value, literal } = token {
                let existing = self.tokens.iter_mut().find_map(|t| match t {
                    Token::Variable { key: k, value: v, literal: l } if k == key => Some((v, l)),
                    _ => None,
                });
                match existing {
                    Some((v, l)) => {
                        *v = value.clone();
                        *l = *literal;
                    }
                    None => self.tokens.push(Token::Variable {
                        key: key.clone(),
                        value: value.clone(),
                        literal: *literal,
                    }),
                }
            }
        }
        self
    }

    pub fn iter_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Variable { key, value, .. } => Some((key.as_str(), value.as_str())),
            _ => None,
        })
    }

    fn iter_vars_with_quoting(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Variable { key, value, literal } => Some((key.as_str(), value.as_str(), *literal)),
            _ => None,
        })
    }

    /// Overlays this document's variables onto `env`. Double-quoted and
    /// bare values are expanded against the accumulated environment so
    /// later keys can reference earlier ones within the same file and
    /// across files in a cascade; single-quoted values are set verbatim
    /// (spec §4.3: single-quoted = literal, never expanded).
    pub fn overlay_expanded(&self, env: &mut EnvStore) -> Result<()> {
        let expander = Expander::new(false);
        for (key, value, literal) in self.iter_vars_with_quoting() {
            if literal {
                env.set(key, value);
            } else {
                let expanded = expander.expand(value, env)?;
                env.set(key, &expanded);
            }
        }
        Ok(())
    }
}

/// `value` was double-quoted (expand on read), single-quoted (literal), or
/// bare. The quote markers themselves are stripped here; expansion of a
/// double-quoted value happens later, in `overlay_expanded`, against the
/// shared Expander so dotenv values and task/run-file env overlays go
/// through identical substitution semantics. Returns `(value, literal)`
/// where `literal` is `true` only for single-quoted values.
fn parse_value(raw: &str) -> (String, bool) {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        (raw[1..raw.len() - 1].to_string(), true)
    } else if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        (raw[1..raw.len() - 1].to_string(), false)
    } else {
        (raw.to_string(), false)
    }
}

fn quote_if_needed(value: &str, literal: bool) -> String {
    if literal {
        format!("'{value}'")
    } else if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '#') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_quoted_and_comment_lines() {
        let doc = DotEnvDocument::parse("A=1\n# a comment\n\nB='two words'\nC=\"three ${A}\"\n");
        assert_eq!(
            doc.tokens,
            vec![
                Token::Variable { key: "A".into(), value: "1".into(), literal: false },
                Token::Comment("# a comment".into()),
                Token::Blank,
                Token::Variable { key: "B".into(), value: "two words".into(), literal: true },
                Token::Variable { key: "C".into(), value: "three ${A}".into(), literal: false },
            ]
        );
    }

    #[test]
    fn overlay_leaves_single_quoted_values_unexpanded() {
        let doc = DotEnvDocument::parse("PASS='$literal'\n");
        let mut env = EnvStore::new();
        env.set("literal", "should-not-appear");
        doc.overlay_expanded(&mut env).unwrap();
        assert_eq!(env.get("PASS"), Some("$literal"));
    }

    #[test]
    fn round_trip_without_comments_between_variables() {
        let text = "A=1\nB=two\n";
        let doc = DotEnvDocument::parse(text);
        assert_eq!(doc.serialize(), text);
    }

    #[test]
    fn merge_overwrites_on_collision_and_preserves_left_order() {
        let left = DotEnvDocument::parse("A=1\nB=2\n");
        let right = DotEnvDocument::parse("B=20\nC=3\n");
        let merged = left.merge(&right);
        let vars: Vec<_> = merged.iter_vars().collect();
        assert_eq!(vars, vec![("A", "1"), ("B", "20"), ("C", "3")]);
    }

    #[test]
    fn overlay_expands_double_quoted_values_against_earlier_keys() {
        let doc = DotEnvDocument::parse("HOST=localhost\nURL=\"http://$HOST/\"\n");
        let mut env = EnvStore::new();
        doc.overlay_expanded(&mut env).unwrap();
        assert_eq!(env.get("URL"), Some("http://localhost/"));
    }
}
