use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::error::{MigrationError, Result};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `YYYYMMDD_HHMMSS_description`, description in snake_case.
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8}_\d{6})_([a-z0-9][a-z0-9_]*)$").expect("Invalid changeset name pattern")
});

/// Identity of a changeset, parsed from its name.
///
/// Names carry a fixed-width timestamp prefix followed by a description, for
/// example `20250715_000000_initial_schema`. Ordering compares the timestamp
/// as an integer first and the description second, so it never depends on
/// how a directory listing happens to be sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangesetId {
    timestamp: i64,
    description: String,
    name: String,
}

impl ChangesetId {
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |reason: &str| MigrationError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let captures = NAME_REGEX
            .captures(name)
            .ok_or_else(|| invalid("expected YYYYMMDD_HHMMSS_snake_case_description"))?;

        let stamp = &captures[1];
        NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
            .map_err(|e| invalid(&format!("timestamp {stamp} is not a valid date: {e}")))?;

        let timestamp = stamp
            .replace('_', "")
            .parse::<i64>()
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            timestamp,
            description: captures[2].to_string(),
            name: name.to_string(),
        })
    }

    /// Builds a fresh identity stamped with `at`, slugifying `description`.
    pub fn generate(at: NaiveDateTime, description: &str) -> Result<Self> {
        let slug = slugify(description);
        if slug.is_empty() {
            return Err(MigrationError::InvalidName {
                name: description.to_string(),
                reason: "description must contain at least one letter or digit".to_string(),
            });
        }
        Self::parse(&format!("{}_{}", at.format(STAMP_FORMAT), slug))
    }

    /// The timestamp prefix as `YYYYMMDDHHMMSS`.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for ChangesetId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lowercases `input` and collapses every run of non-alphanumerics into `_`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
