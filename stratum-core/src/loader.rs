//! SQL file changesets.
//!
//! A changeset file is named `<YYYYMMDD_HHMMSS>_<description>.sql` and split
//! into sections by marker lines:
//!
//! ```sql
//! -- migrate:up
//! CREATE TABLE foo (id INTEGER PRIMARY KEY);
//!
//! -- migrate:down
//! DROP TABLE foo;
//!
//! -- migrate:rollback
//! DROP TABLE IF EXISTS foo;
//! ```
//!
//! `up` is required. Without a `down` section the changeset cannot be
//! reverted. `rollback` is stored in the ledger for manual recovery only.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Database, Executor};

use crate::changeset::{Changeset, Direction};
use crate::error::{MigrationError, Result};
use crate::guidelines::blank_comments_and_literals;
use crate::id::ChangesetId;

pub const FILE_EXTENSION: &str = "sql";

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";
const ROLLBACK_MARKER: &str = "-- migrate:rollback";

#[derive(Debug, Clone)]
pub struct SqlChangeset {
    id: ChangesetId,
    path: Option<PathBuf>,
    up: String,
    down: Option<String>,
    rollback: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Up,
    Down,
    Rollback,
}

impl SqlChangeset {
    /// Parses the sectioned `source` of the changeset called `name`.
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        let id = ChangesetId::parse(name)?;
        let invalid = |reason: String| MigrationError::InvalidChangeset {
            name: name.to_string(),
            reason,
        };

        let mut up: Option<String> = None;
        let mut down: Option<String> = None;
        let mut rollback: Option<String> = None;
        let mut section = Section::Preamble;

        for line in source.lines() {
            let marker = match line.trim().to_ascii_lowercase().as_str() {
                UP_MARKER => Some((Section::Up, &mut up)),
                DOWN_MARKER => Some((Section::Down, &mut down)),
                ROLLBACK_MARKER => Some((Section::Rollback, &mut rollback)),
                _ => None,
            };

            if let Some((next, slot)) = marker {
                if slot.is_some() {
                    return Err(invalid(format!("duplicate '{}' section", line.trim())));
                }
                *slot = Some(String::new());
                section = next;
                continue;
            }

            let slot = match section {
                Section::Preamble => continue,
                Section::Up => &mut up,
                Section::Down => &mut down,
                Section::Rollback => &mut rollback,
            };
            if let Some(text) = slot.as_mut() {
                text.push_str(line);
                text.push('\n');
            }
        }

        let up = up.ok_or_else(|| invalid(format!("missing '{UP_MARKER}' section")))?;

        Ok(Self {
            id,
            path: None,
            up: up.trim().to_string(),
            down: down.map(|s| s.trim().to_string()),
            rollback: rollback
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    /// Reads and parses one changeset file. The file stem is the name.
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let source = std::fs::read_to_string(path).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut changeset = Self::parse(&name, &source)?;
        changeset.path = Some(path.to_path_buf());
        Ok(changeset)
    }

    pub fn id(&self) -> &ChangesetId {
        &self.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn up_sql(&self) -> &str {
        &self.up
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down.as_deref()
    }
}

/// True when `sql` holds nothing but whitespace and comments.
fn is_blank(sql: &str) -> bool {
    blank_comments_and_literals(sql).trim().is_empty()
}

#[async_trait]
impl<DB> Changeset<DB> for SqlChangeset
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    fn name(&self) -> &str {
        self.id.name()
    }

    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()> {
        if is_blank(&self.up) {
            return Err(MigrationError::InvalidChangeset {
                name: self.id.to_string(),
                reason: "the up section is empty".to_string(),
            });
        }
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&self.up)).await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()> {
        let Some(down) = self.down.as_deref() else {
            return Err(MigrationError::MissingOperation {
                name: self.id.to_string(),
                direction: Direction::Down,
            });
        };
        if !is_blank(down) {
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(down)).await?;
        }
        Ok(())
    }

    fn reversible(&self) -> bool {
        self.down.is_some()
    }

    fn rollback_sql(&self) -> Option<&str> {
        self.rollback.as_deref()
    }

    fn sql(&self) -> Option<&str> {
        Some(&self.up)
    }
}

/// Loads every `*.sql` changeset in `dir` (non-recursive), ordered by
/// [`ChangesetId`]. Other files are ignored; a `.sql` file whose name is not
/// a valid changeset name is an error.
pub fn load_directory(dir: &Path) -> Result<Vec<SqlChangeset>> {
    let io_error = |source| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut changesets = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && is_changeset_file(&path) {
            changesets.push(SqlChangeset::from_file(&path)?);
        }
    }

    changesets.sort_by(|a, b| a.id.cmp(&b.id));
    if let Some(pair) = changesets.windows(2).find(|w| w[0].id == w[1].id) {
        return Err(MigrationError::Duplicate(pair[0].id.to_string()));
    }

    tracing::debug!(dir = %dir.display(), count = changesets.len(), "Loaded changeset files");
    Ok(changesets)
}

fn is_changeset_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(FILE_EXTENSION))
        .unwrap_or(false)
}

/// Writes a templated changeset file for `description` into `dir`, stamped
/// with `at`. Never overwrites an existing file.
pub fn create_changeset_file(dir: &Path, description: &str, at: NaiveDateTime) -> Result<PathBuf> {
    let id = ChangesetId::generate(at, description)?;
    let path = dir.join(format!("{}.{FILE_EXTENSION}", id.name()));
    let io_error = |source| MigrationError::Io {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(|source| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(io_error)?;
    file.write_all(template(&id).as_bytes()).map_err(io_error)?;

    tracing::info!(changeset = %id, path = %path.display(), "Created changeset");
    Ok(path)
}

fn template(id: &ChangesetId) -> String {
    format!(
        "-- {id}\n\
         {UP_MARKER}\n\
         \n\
         \n\
         {DOWN_MARKER}\n\
         \n\
         \n\
         {ROLLBACK_MARKER}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const FULL: &str = "\
-- adds the foo table
-- migrate:up
CREATE TABLE foo (id INTEGER PRIMARY KEY);

-- migrate:down
DROP TABLE foo;

-- migrate:rollback
DROP TABLE IF EXISTS foo;
";

    #[test]
    fn test_parse_sections() {
        let changeset = SqlChangeset::parse("20250101_000000_a", FULL).unwrap();
        assert_eq!(changeset.up_sql(), "CREATE TABLE foo (id INTEGER PRIMARY KEY);");
        assert_eq!(changeset.down_sql(), Some("DROP TABLE foo;"));
        assert_eq!(
            Changeset::<sqlx::Sqlite>::rollback_sql(&changeset),
            Some("DROP TABLE IF EXISTS foo;")
        );
        assert!(Changeset::<sqlx::Sqlite>::reversible(&changeset));
    }

    #[test]
    fn test_parse_without_down_is_irreversible() {
        let changeset =
            SqlChangeset::parse("20250101_000000_a", "-- migrate:up\nCREATE TABLE foo (id INT);")
                .unwrap();
        assert_eq!(changeset.down_sql(), None);
        assert!(!Changeset::<sqlx::Sqlite>::reversible(&changeset));
        assert_eq!(Changeset::<sqlx::Sqlite>::rollback_sql(&changeset), None);
    }

    #[test]
    fn test_parse_rejects_missing_up_and_duplicates() {
        let err = SqlChangeset::parse("20250101_000000_a", "-- migrate:down\nDROP TABLE foo;")
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidChangeset { .. }));

        let err = SqlChangeset::parse(
            "20250101_000000_a",
            "-- migrate:up\nSELECT 1;\n-- migrate:up\nSELECT 2;",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let err = SqlChangeset::parse("not_a_name", FULL).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidName { .. }));
    }

    #[test]
    fn test_load_directory_orders_by_id_and_skips_other_files() {
        let dir = TempDir::new().unwrap();
        for name in ["20250103_000000_c", "20250101_000000_a", "20250102_000000_b"] {
            std::fs::write(dir.path().join(format!("{name}.sql")), FULL).unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "not a changeset").unwrap();

        let names: Vec<String> = load_directory(dir.path())
            .unwrap()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["20250101_000000_a", "20250102_000000_b", "20250103_000000_c"]
        );
    }

    #[test]
    fn test_load_directory_rejects_misnamed_sql() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("add_users.sql"), FULL).unwrap();

        let err = load_directory(dir.path()).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidName { .. }));
    }

    #[test]
    fn test_create_changeset_file_round_trips_through_loader() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("migrations");
        let at = NaiveDate::from_ymd_opt(2025, 7, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        let path = create_changeset_file(&target, "Initial schema", at).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "20250715_000000_initial_schema.sql"
        );

        let loaded = load_directory(&target).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id().name(), "20250715_000000_initial_schema");
        assert_eq!(loaded[0].down_sql(), Some(""));

        let err = create_changeset_file(&target, "initial schema", at).unwrap_err();
        assert!(matches!(err, MigrationError::Io { .. }));
    }
}
