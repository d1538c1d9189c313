// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Database Schema Migration Framework
//!
//! Provides versioned schema migrations with transactional safety.
//! Each migration has a version number, a name and the SQL it runs.
//! The runner tracks applied versions in a `schema_version` table and runs
//! pending migrations in order within a single transaction.
//!
//! Several processes may open the same database at once, so the current
//! version is re-read after the exclusive lock is taken.

use rusqlite::Connection;
use tracing::info;

use super::StorageError;

/// A single schema migration step.
pub struct Migration {
    /// Monotonically increasing version number (starting at 1).
    pub version: u32,
    /// Human-readable name for this migration.
    pub name: &'static str,
    pub sql: &'static str,
}

/// Runs schema migrations against a database connection.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Runs all pending migrations in a transaction.
    ///
    /// Creates the `schema_version` table if it doesn't exist, then applies
    /// any migrations whose version is greater than the current schema version.
    /// All pending migrations run within a single transaction; if any migration
    /// fails, all changes are rolled back.
    pub fn run(conn: &Connection, migrations: &[Migration]) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        for window in migrations.windows(2) {
            if window[0].version >= window[1].version {
                return Err(StorageError::Migration(format!(
                    "Migrations are not in order: v{} before v{}",
                    window[0].version, window[1].version
                )));
            }
        }

        if Self::pending(conn, migrations)?.is_empty() {
            return Ok(());
        }

        conn.execute_batch("BEGIN EXCLUSIVE TRANSACTION;")?;

        // Another process may have migrated while we waited for the lock.
        let pending = match Self::pending(conn, migrations) {
            Ok(pending) => pending,
            Err(e) => {
                conn.execute_batch("ROLLBACK;")?;
                return Err(e);
            }
        };

        for migration in &pending {
            if let Err(e) = conn.execute_batch(migration.sql) {
                conn.execute_batch("ROLLBACK;")?;
                return Err(StorageError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e
                )));
            }

            if let Err(e) = conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![migration.version, super::unix_millis() as i64],
            ) {
                conn.execute_batch("ROLLBACK;")?;
                return Err(StorageError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                )));
            }

            info!(
                version = migration.version,
                name = migration.name,
                "applied schema migration"
            );
        }

        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn pending<'m>(
        conn: &Connection,
        migrations: &'m [Migration],
    ) -> Result<Vec<&'m Migration>, StorageError> {
        let current = Self::current_version(conn)?;
        Ok(migrations.iter().filter(|m| m.version > current).collect())
    }

    /// Returns the current schema version, or 0 if no migrations have been applied.
    pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })?;

        Ok(version.unwrap_or(0))
    }
}

/// Returns all registered migrations in version order.
///
/// This is the single source of truth for the database schema.
/// New migrations are appended to the end of this list.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "baseline_records",
            sql: MIGRATION_V1_BASELINE,
        },
        Migration {
            version: 2,
            name: "extension_index",
            sql: MIGRATION_V2_EXTENSION_INDEX,
        },
    ]
}

/// Encrypted key/value records grouped by collection, plus the registry of
/// extensions that were installed into this database.
const MIGRATION_V1_BASELINE: &str = "
    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        key_tag BLOB NOT NULL,
        key_encrypted BLOB NOT NULL,
        value_encrypted BLOB NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (collection, key_tag)
    );

    CREATE TABLE IF NOT EXISTS extensions (
        name TEXT PRIMARY KEY,
        version INTEGER NOT NULL,
        registered_at INTEGER NOT NULL
    );
";

/// Rows maintained by secondary-index extensions.
const MIGRATION_V2_EXTENSION_INDEX: &str = "
    CREATE TABLE IF NOT EXISTS extension_index (
        extension TEXT NOT NULL,
        collection TEXT NOT NULL,
        key_tag BLOB NOT NULL,
        value_tag BLOB NOT NULL,
        PRIMARY KEY (extension, collection, key_tag)
    );

    CREATE INDEX IF NOT EXISTS idx_extension_index_value
        ON extension_index(extension, value_tag);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(MigrationRunner::current_version(&conn).unwrap(), 0);

        MigrationRunner::run(&conn, &all_migrations()).unwrap();

        let latest = all_migrations().last().unwrap().version;
        assert_eq!(MigrationRunner::current_version(&conn).unwrap(), latest);
    }

    #[test]
    fn test_running_twice_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        MigrationRunner::run(&conn, &all_migrations()).unwrap();
        MigrationRunner::run(&conn, &all_migrations()).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied as usize, all_migrations().len());
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = vec![
            Migration {
                version: 1,
                name: "ok",
                sql: "CREATE TABLE a (x INTEGER);",
            },
            Migration {
                version: 2,
                name: "broken",
                sql: "THIS IS NOT SQL;",
            },
        ];

        let result = MigrationRunner::run(&conn, &migrations);
        assert!(matches!(result, Err(StorageError::Migration(_))));
        assert_eq!(MigrationRunner::current_version(&conn).unwrap(), 0);

        let table_a: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table_a, 0);
    }

    #[test]
    fn test_out_of_order_migrations_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = vec![
            Migration {
                version: 2,
                name: "second",
                sql: "SELECT 1;",
            },
            Migration {
                version: 1,
                name: "first",
                sql: "SELECT 1;",
            },
        ];

        assert!(matches!(
            MigrationRunner::run(&conn, &migrations),
            Err(StorageError::Migration(_))
        ));
    }
}
