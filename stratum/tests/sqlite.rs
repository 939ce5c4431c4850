use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::{Sqlite, SqliteConnection};
use stratum::sqlite::{SqliteBackend, SqliteCatalog};
use stratum::{
    Backend, Catalog, Changeset, Guidelines, LedgerEntry, MigrationError, Migrator,
    NewLedgerEntry, Registry, SqlChangeset, ddl,
};
use tempfile::TempDir;

struct CreateFoo;

#[async_trait]
impl Changeset<Sqlite> for CreateFoo {
    fn name(&self) -> &str {
        "20250101_000000_a"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        ddl::create_table_if_not_exists(
            &SqliteCatalog,
            conn,
            "foo",
            "CREATE TABLE foo (id INTEGER PRIMARY KEY)",
        )
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        SqliteCatalog.execute(conn, "DROP TABLE IF EXISTS foo").await?;
        Ok(())
    }

    fn rollback_sql(&self) -> Option<&str> {
        Some("DROP TABLE IF EXISTS foo;")
    }
}

struct AddBar;

#[async_trait]
impl Changeset<Sqlite> for AddBar {
    fn name(&self) -> &str {
        "20250102_000000_b"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        ddl::add_column_if_not_exists(&SqliteCatalog, conn, "foo", "bar", "INTEGER").await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        if stratum::probe::column_exists(&SqliteCatalog, conn, "foo", "bar").await {
            SqliteCatalog.execute(conn, "ALTER TABLE foo DROP COLUMN bar").await?;
        }
        Ok(())
    }
}

struct IndexBar;

#[async_trait]
impl Changeset<Sqlite> for IndexBar {
    fn name(&self) -> &str {
        "20250103_000000_c"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        ddl::create_unique_index_if_not_exists(&SqliteCatalog, conn, "foo", "idx_foo_bar", "(bar)")
            .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        SqliteCatalog.execute(conn, "DROP INDEX IF EXISTS idx_foo_bar").await?;
        Ok(())
    }
}

/// Creates a table, then fails. Takes the place of `AddBar`.
struct Boom;

#[async_trait]
impl Changeset<Sqlite> for Boom {
    fn name(&self) -> &str {
        "20250102_000000_boom"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        SqliteCatalog.execute(conn, "CREATE TABLE halfway (id INTEGER)").await?;
        SqliteCatalog.execute(conn, "INSERT INTO missing_table VALUES (1)").await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        SqliteCatalog.execute(conn, "DROP TABLE IF EXISTS halfway").await?;
        Ok(())
    }
}

/// Forward only.
struct Seed;

#[async_trait]
impl Changeset<Sqlite> for Seed {
    fn name(&self) -> &str {
        "20250104_000000_seed"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        SqliteCatalog.execute(conn, "INSERT INTO foo (id) VALUES (1)").await?;
        Ok(())
    }

    fn reversible(&self) -> bool {
        false
    }
}

type Calls = Arc<Mutex<Vec<&'static str>>>;

/// Marks where the changeset body ran among the backend calls.
struct Marker {
    calls: Calls,
}

#[async_trait]
impl Changeset<Sqlite> for Marker {
    fn name(&self) -> &str {
        "20250101_000000_marker"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        self.calls.lock().unwrap().push("body");
        SqliteCatalog.execute(conn, "CREATE TABLE marker (id INTEGER)").await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        self.calls.lock().unwrap().push("body");
        SqliteCatalog.execute(conn, "DROP TABLE marker").await?;
        Ok(())
    }
}

/// SQLite underneath, logging ledger writes. With `transactional_ddl` off the
/// executor handles it the way it handles MySQL.
struct ObservedBackend {
    inner: SqliteBackend,
    transactional_ddl: bool,
    calls: Calls,
}

impl ObservedBackend {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Backend for ObservedBackend {
    type Database = Sqlite;

    fn name(&self) -> &'static str {
        "observed"
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.transactional_ddl
    }

    async fn connect(&self) -> Result<SqliteConnection, MigrationError> {
        self.inner.connect().await
    }

    async fn create_ledger(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        self.record("create_ledger");
        self.inner.create_ledger(conn).await
    }

    async fn select_applied(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        self.inner.select_applied(conn).await
    }

    async fn select_batch(
        &self,
        conn: &mut SqliteConnection,
        batch: i64,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        self.inner.select_batch(conn, batch).await
    }

    async fn max_batch(&self, conn: &mut SqliteConnection) -> Result<i64, MigrationError> {
        self.inner.max_batch(conn).await
    }

    async fn count_name(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<i64, MigrationError> {
        self.inner.count_name(conn, name).await
    }

    async fn insert_entry(
        &self,
        conn: &mut SqliteConnection,
        entry: &NewLedgerEntry<'_>,
    ) -> Result<(), MigrationError> {
        self.record("insert_entry");
        self.inner.insert_entry(conn, entry).await
    }

    async fn delete_entry(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<u64, MigrationError> {
        self.record("delete_entry");
        self.inner.delete_entry(conn, name).await
    }
}

fn observed(dir: &TempDir, transactional_ddl: bool) -> (ObservedBackend, Calls) {
    let calls = Calls::default();
    let backend = ObservedBackend {
        inner: backend(dir),
        transactional_ddl,
        calls: Arc::clone(&calls),
    };
    (backend, calls)
}

/// Calls made after the most recent changeset body.
fn calls_after_body(calls: &Calls) -> Vec<&'static str> {
    let calls = calls.lock().unwrap();
    let body = calls
        .iter()
        .rposition(|call| *call == "body")
        .expect("body ran");
    calls[body + 1..].to_vec()
}

fn setup_test() -> TempDir {
    let _ = tracing_subscriber::fmt().try_init();
    TempDir::new().expect("Failed to create temp dir")
}

fn backend(dir: &TempDir) -> SqliteBackend {
    SqliteBackend::from_path(dir.path().join("app.db"))
}

fn abc() -> Registry<Sqlite> {
    Registry::new()
        .with(CreateFoo)
        .unwrap()
        .with(AddBar)
        .unwrap()
        .with(IndexBar)
        .unwrap()
}

fn names(entries: &[LedgerEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

async fn connect(migrator: &Migrator<SqliteBackend>) -> SqliteConnection {
    migrator.backend().connect().await.unwrap()
}

async fn has_table(migrator: &Migrator<SqliteBackend>, table: &str) -> bool {
    let mut conn = connect(migrator).await;
    SqliteCatalog.has_table(&mut conn, table).await.unwrap()
}

#[tokio::test]
async fn test_up_down_up() {
    let dir = setup_test();
    let migrator = Migrator::new(backend(&dir), abc());

    let report = migrator.run_pending().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(report.message, "Applied 3 changeset(s) in batch 1");

    let applied = migrator.applied().await.unwrap();
    assert_eq!(
        names(&applied),
        vec!["20250101_000000_a", "20250102_000000_b", "20250103_000000_c"]
    );
    assert!(applied.iter().all(|e| e.batch == 1));
    assert_eq!(applied[0].rollback_sql.as_deref(), Some("DROP TABLE IF EXISTS foo;"));

    let mut conn = connect(&migrator).await;
    assert!(SqliteCatalog.has_column(&mut conn, "foo", "bar").await.unwrap());
    assert!(SqliteCatalog.has_index(&mut conn, "foo", "idx_foo_bar").await.unwrap());
    SqliteCatalog
        .execute(&mut conn, "INSERT INTO foo (id, bar) VALUES (1, 7)")
        .await
        .unwrap();
    assert!(
        SqliteCatalog
            .execute(&mut conn, "INSERT INTO foo (id, bar) VALUES (2, 7)")
            .await
            .is_err()
    );
    drop(conn);

    let report = migrator.rollback_last_batch().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(
        report.names(),
        vec!["20250103_000000_c", "20250102_000000_b", "20250101_000000_a"]
    );
    assert!(migrator.applied().await.unwrap().is_empty());
    assert!(!has_table(&migrator, "foo").await);

    let report = migrator.run_pending().await.unwrap();
    assert!(report.success);
    let again = migrator.applied().await.unwrap();
    assert_eq!(names(&again), names(&applied));
    assert!(again.iter().all(|e| e.batch == 1));
    assert!(has_table(&migrator, "foo").await);
}

#[tokio::test]
async fn test_run_pending_twice_is_a_no_op() {
    let dir = setup_test();
    let migrator = Migrator::new(backend(&dir), abc());

    assert!(migrator.run_pending().await.unwrap().success);
    let report = migrator.run_pending().await.unwrap();

    assert!(report.success);
    assert!(report.steps.is_empty());
    assert_eq!(report.message, "Nothing to migrate");
    assert_eq!(migrator.applied().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_order_follows_names_not_registration() {
    let dir = setup_test();
    let registry = Registry::new()
        .with(IndexBar)
        .unwrap()
        .with(CreateFoo)
        .unwrap()
        .with(AddBar)
        .unwrap();
    let migrator = Migrator::new(backend(&dir), registry);

    let report = migrator.run_pending().await.unwrap();
    assert_eq!(
        report.names(),
        vec!["20250101_000000_a", "20250102_000000_b", "20250103_000000_c"]
    );

    let report = migrator.reset_all().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(
        report.names(),
        vec!["20250103_000000_c", "20250102_000000_b", "20250101_000000_a"]
    );
    assert_eq!(report.message, "Reset 3 changeset(s)");
    assert!(migrator.applied().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batches() {
    let dir = setup_test();

    let first = Migrator::new(
        backend(&dir),
        Registry::new().with(CreateFoo).unwrap().with(AddBar).unwrap(),
    );
    assert!(first.run_pending().await.unwrap().success);

    let second = Migrator::new(backend(&dir), abc());
    let report = second.run_pending().await.unwrap();
    assert_eq!(report.names(), vec!["20250103_000000_c"]);
    assert_eq!(report.message, "Applied 1 changeset(s) in batch 2");

    let applied = second.applied().await.unwrap();
    let batches: Vec<i64> = applied.iter().map(|e| e.batch).collect();
    assert_eq!(batches, vec![1, 1, 2]);

    // Only the latest batch is rolled back.
    let report = second.rollback_last_batch().await.unwrap();
    assert_eq!(report.names(), vec!["20250103_000000_c"]);
    assert_eq!(report.message, "Rolled back 1 changeset(s) from batch 2");
    assert_eq!(second.applied().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failure_halts_the_batch() {
    let dir = setup_test();
    let registry = Registry::new()
        .with(CreateFoo)
        .unwrap()
        .with(Boom)
        .unwrap()
        .with(IndexBar)
        .unwrap();
    let migrator = Migrator::new(backend(&dir), registry);

    let report = migrator.run_pending().await.unwrap();
    assert!(!report.success);
    assert_eq!(report.names(), vec!["20250101_000000_a", "20250102_000000_boom"]);
    assert!(report.steps[0].is_success());
    assert!(!report.steps[1].is_success());
    let halted = "Halted at 20250102_000000_boom: Migration 20250102_000000_boom up failed:";
    assert!(report.message.starts_with(halted), "{}", report.message);

    assert_eq!(names(&migrator.applied().await.unwrap()), vec!["20250101_000000_a"]);
    assert!(has_table(&migrator, "foo").await);
    assert!(!has_table(&migrator, "halfway").await);
}

#[tokio::test]
async fn test_ledger_never_holds_duplicates() {
    let dir = setup_test();
    let migrator = Migrator::new(backend(&dir), abc());

    migrator.run_pending().await.unwrap();
    migrator.rollback_last_batch().await.unwrap();
    migrator.run_pending().await.unwrap();
    migrator.run_pending().await.unwrap();

    let applied = migrator.applied().await.unwrap();
    let mut unique = names(&applied);
    unique.dedup();
    assert_eq!(unique.len(), applied.len());
    assert_eq!(applied.len(), 3);
}

#[tokio::test]
async fn test_fresh_matches_a_clean_migrate() {
    let dir = setup_test();

    let partial = Migrator::new(backend(&dir), Registry::new().with(CreateFoo).unwrap());
    partial.run_pending().await.unwrap();
    let full = Migrator::new(backend(&dir), abc());
    full.run_pending().await.unwrap();

    let report = full.fresh().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(report.reset.steps.len(), 3);
    assert_eq!(report.migrate.as_ref().map(|m| m.steps.len()), Some(3));

    let clean_dir = setup_test();
    let clean = Migrator::new(backend(&clean_dir), abc());
    clean.run_pending().await.unwrap();

    let summary = |entries: Vec<LedgerEntry>| -> Vec<(String, i64)> {
        entries.into_iter().map(|e| (e.name, e.batch)).collect()
    };
    assert_eq!(
        summary(full.applied().await.unwrap()),
        summary(clean.applied().await.unwrap())
    );
}

#[tokio::test]
async fn test_fresh_stops_when_reset_fails() {
    let dir = setup_test();
    let registry = Registry::new()
        .with(CreateFoo)
        .unwrap()
        .with(Seed)
        .unwrap();
    let migrator = Migrator::new(backend(&dir), registry);
    migrator.run_pending().await.unwrap();

    let report = migrator.fresh().await.unwrap();
    assert!(!report.success);
    assert!(report.migrate.is_none());
    assert!(report.message.starts_with("Reset failed:"));
    assert!(report.message.contains("does not define a down operation"));

    // The irreversible changeset is still recorded.
    assert_eq!(migrator.applied().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_guidelines_gate_forward_sql() {
    let dir = setup_test();
    let enum_table = || {
        SqlChangeset::parse(
            "20250101_000000_kinds",
            "-- migrate:up\nCREATE TABLE kinds (payload JSON);\n-- migrate:down\nDROP TABLE kinds;",
        )
        .unwrap()
    };

    let migrator = Migrator::new(backend(&dir), Registry::new().with(enum_table()).unwrap());
    let report = migrator.run_pending().await.unwrap();
    assert!(!report.success);
    assert!(report.message.contains("violates schema guidelines"));
    assert!(migrator.applied().await.unwrap().is_empty());
    assert!(!has_table(&migrator, "kinds").await);

    // SQLite accepts any type name, so with enforcement off it runs.
    let migrator = Migrator::new(backend(&dir), Registry::new().with(enum_table()).unwrap())
        .with_guidelines(Guidelines::disabled());
    let report = migrator.run_pending().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert!(has_table(&migrator, "kinds").await);
}

#[tokio::test]
async fn test_status_reports_pending_and_orphans() {
    let dir = setup_test();
    let full = Migrator::new(
        backend(&dir),
        Registry::new().with(CreateFoo).unwrap().with(AddBar).unwrap(),
    );
    full.run_pending().await.unwrap();

    let migrator = Migrator::new(
        backend(&dir),
        Registry::new().with(CreateFoo).unwrap().with(IndexBar).unwrap(),
    );
    let status = migrator.status().await.unwrap();

    let applied: Vec<&str> = status.applied().map(|e| e.name.as_str()).collect();
    let pending: Vec<&str> = status.pending().map(|e| e.name.as_str()).collect();
    assert_eq!(applied, vec!["20250101_000000_a"]);
    assert_eq!(pending, vec!["20250103_000000_c"]);
    assert_eq!(names(&status.orphans), vec!["20250102_000000_b"]);
}

#[tokio::test]
async fn test_rollback_of_unregistered_changeset_halts() {
    let dir = setup_test();
    Migrator::new(backend(&dir), abc()).run_pending().await.unwrap();

    let migrator = Migrator::new(backend(&dir), Registry::new().with(CreateFoo).unwrap());
    let report = migrator.rollback_last_batch().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.names(), vec!["20250103_000000_c"]);
    assert!(report.message.contains("Changeset not found: 20250103_000000_c"));
    assert_eq!(migrator.applied().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_sql_file_changesets() {
    let dir = setup_test();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();

    // Written newest first; directory order must not matter.
    std::fs::write(
        migrations.join("20250103_000000_c.sql"),
        "-- migrate:up\nCREATE UNIQUE INDEX idx_foo_bar ON foo (bar);\n\
         -- migrate:down\nDROP INDEX idx_foo_bar;\n",
    )
    .unwrap();
    std::fs::write(
        migrations.join("20250102_000000_b.sql"),
        "-- migrate:up\nALTER TABLE foo ADD COLUMN bar INTEGER;\n\
         -- migrate:down\nALTER TABLE foo DROP COLUMN bar;\n",
    )
    .unwrap();
    std::fs::write(
        migrations.join("20250101_000000_a.sql"),
        "-- add foo\n-- migrate:up\nCREATE TABLE foo (id INTEGER PRIMARY KEY);\n\
         -- migrate:down\nDROP TABLE foo;\n-- migrate:rollback\nDROP TABLE IF EXISTS foo;\n",
    )
    .unwrap();
    std::fs::write(migrations.join("README.md"), "not a changeset").unwrap();

    let registry = Registry::<Sqlite>::from_directory(&migrations).unwrap();
    assert_eq!(registry.len(), 3);
    let migrator = Migrator::new(backend(&dir), registry);

    let report = migrator.run_pending().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(
        report.names(),
        vec!["20250101_000000_a", "20250102_000000_b", "20250103_000000_c"]
    );
    let applied = migrator.applied().await.unwrap();
    assert_eq!(applied[0].rollback_sql.as_deref(), Some("DROP TABLE IF EXISTS foo;"));

    let report = migrator.reset_all().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert!(!has_table(&migrator, "foo").await);
}

#[tokio::test]
async fn test_created_file_is_loadable() {
    let dir = setup_test();
    let migrations = dir.path().join("migrations");
    let at = chrono::NaiveDate::from_ymd_opt(2025, 3, 4)
        .unwrap()
        .and_hms_opt(5, 6, 7)
        .unwrap();

    let path = stratum::loader::create_changeset_file(&migrations, "Add users table", at).unwrap();
    assert_eq!(
        path.file_name().and_then(|n| n.to_str()),
        Some("20250304_050607_add_users_table.sql")
    );

    let registry = Registry::<Sqlite>::from_directory(&migrations).unwrap();
    assert!(registry.contains("20250304_050607_add_users_table"));

    // The template's up section is empty until someone fills it in.
    let migrator = Migrator::new(backend(&dir), registry);
    let report = migrator.run_pending().await.unwrap();
    assert!(!report.success);
    assert!(report.message.contains("up section is empty"));
    assert!(migrator.applied().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_is_provisioned_before_the_transaction() {
    let dir = setup_test();
    let (backend, calls) = observed(&dir, true);
    let registry = Registry::new()
        .with(Marker {
            calls: Arc::clone(&calls),
        })
        .unwrap();
    let migrator = Migrator::new(backend, registry);

    let report = migrator.run_pending().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(calls_after_body(&calls), vec!["insert_entry"]);

    let report = migrator.rollback_last_batch().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(calls_after_body(&calls), vec!["delete_entry"]);
    assert!(migrator.applied().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rollback_without_transactional_ddl_erases_ledger_rows() {
    let dir = setup_test();
    let (backend, calls) = observed(&dir, false);
    let migrator = Migrator::new(backend, abc());

    let report = migrator.run_pending().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(migrator.applied().await.unwrap().len(), 3);

    let report = migrator.rollback_last_batch().await.unwrap();
    assert!(report.success, "{}", report.message);
    assert_eq!(
        report.names(),
        vec!["20250103_000000_c", "20250102_000000_b", "20250101_000000_a"]
    );
    assert!(migrator.applied().await.unwrap().is_empty());

    let calls = calls.lock().unwrap();
    assert_eq!(calls.iter().filter(|c| **c == "delete_entry").count(), 3);
    drop(calls);

    let mut conn = migrator.backend().connect().await.unwrap();
    assert!(!SqliteCatalog.has_table(&mut conn, "foo").await.unwrap());
}
