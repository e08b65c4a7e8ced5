//! Shared test utilities: a throwaway SQLite database per test.
//!
//! Unlike a server-backed store, an embedded database needs no shared
//! container -- each test gets its own temp file with migrations applied.

use sqlx::SqlitePool;
use tempfile::TempDir;

use taskforge_db::DbConfig;
use taskforge_db::pool;

/// A temporary database, kept alive for the duration of a test.
///
/// Drop this last: dropping `dir` deletes the backing file.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

/// Create a temporary database with migrations applied.
pub async fn create_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("failed to create temp dir for test database");
    let db_path = dir.path().join("test.db");
    let config = DbConfig::new(&db_path);

    let pool = pool::create_pool(&config)
        .await
        .expect("failed to open temp database");

    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .expect("migrations should succeed");

    TestDb { pool, _dir: dir }
}
