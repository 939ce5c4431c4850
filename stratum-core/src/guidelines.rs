//! Static schema guideline checks over changeset SQL.
//!
//! Two rules: column types on a deny list, and `TEXT`-family columns
//! declared with a `DEFAULT`. Matching is textual; comments and string
//! literals are blanked out first so they cannot trigger or hide a finding.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Introduces a column definition: `(` or `,` inside a table body, or an
/// `ADD` / `MODIFY` / `CHANGE` clause, followed by the column name.
const COLUMN_LEAD: &str =
    r#"(?:[(,]|\b(?:ADD|MODIFY|CHANGE)(?:\s+COLUMN)?(?:\s+[`"]?\w+[`"]?)??)\s*[`"]?\w+[`"]?\s+"#;

static TEXT_DEFAULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){COLUMN_LEAD}(?:TINY|MEDIUM|LONG)?TEXT\b[^,()]*\bDEFAULT\b"
    ))
    .expect("Invalid text default pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Guidelines {
    /// Refuse to run changesets that violate a rule.
    pub enforce: bool,
    pub denied_types: Vec<String>,
    pub forbid_text_default: bool,
}

impl Default for Guidelines {
    fn default() -> Self {
        Self {
            enforce: true,
            denied_types: ["ENUM", "SET", "JSON", "GEOMETRY"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            forbid_text_default: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    DeniedType,
    TextDefault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: Rule,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl Guidelines {
    /// Permissive guidelines that never block execution.
    pub fn disabled() -> Self {
        Self {
            enforce: false,
            ..Self::default()
        }
    }

    pub fn validate(&self, sql: &str) -> Vec<Violation> {
        let code = blank_comments_and_literals(sql);
        let mut violations = Vec::new();

        for denied in &self.denied_types {
            let pattern = format!(r"(?i){COLUMN_LEAD}{}\b", regex::escape(denied));
            let Ok(regex) = Regex::new(&pattern) else {
                tracing::warn!(denied_type = %denied, "Skipping unusable denied type");
                continue;
            };
            for m in regex.find_iter(&code) {
                violations.push(Violation {
                    rule: Rule::DeniedType,
                    line: line_of(&code, m.end()),
                    message: format!("column type {} is not allowed", denied.to_uppercase()),
                });
            }
        }

        if self.forbid_text_default {
            for m in TEXT_DEFAULT.find_iter(&code) {
                violations.push(Violation {
                    rule: Rule::TextDefault,
                    line: line_of(&code, m.end()),
                    message: "TEXT columns must not declare a DEFAULT".to_string(),
                });
            }
        }

        violations.sort_by_key(|v| v.line);
        violations
    }

    /// Fails with [`MigrationError::Guidelines`] when enforcing and `sql`
    /// has violations.
    pub fn check(&self, name: &str, sql: &str) -> Result<()> {
        if !self.enforce {
            return Ok(());
        }
        let violations = self.validate(sql);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::Guidelines {
                name: name.to_string(),
                violations,
            })
        }
    }
}

/// Checks `sql` against the default guidelines.
pub fn validate_sql(sql: &str) -> Vec<Violation> {
    Guidelines::default().validate(sql)
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Replaces comments and quoted string contents with spaces, keeping line
/// breaks and byte offsets intact.
pub(crate) fn blank_comments_and_literals(sql: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Quoted(char),
    }

    let mut out = String::with_capacity(sql.len());
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();

    let blank = |c: char, out: &mut String| {
        if c == '\n' {
            out.push('\n');
        } else {
            out.extend(std::iter::repeat_n(' ', c.len_utf8()));
        }
    };

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '\'' | '"' => {
                    out.push(c);
                    state = State::Quoted(c);
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
                blank(c, &mut out);
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    blank(c, &mut out);
                }
            }
            State::Quoted(quote) => {
                if c == quote {
                    if chars.peek() == Some(&quote) {
                        chars.next();
                        out.push_str("  ");
                    } else {
                        out.push(c);
                        state = State::Code;
                    }
                } else if c == '\\' {
                    blank(c, &mut out);
                    if let Some(escaped) = chars.next() {
                        blank(escaped, &mut out);
                    }
                } else {
                    blank(c, &mut out);
                }
            }
        }
    }
    out
}
