//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! A database written by the single-chat bot (a `mutes` table keyed by
//! `user_id` alone, no `_migrations` table) is detected on first run; its
//! table is renamed to `legacy_mutes` so V1 can create the keyed schema.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mutes (
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                until TEXT NOT NULL,
                PRIMARY KEY (user_id, chat_id)
            );
            CREATE INDEX IF NOT EXISTS idx_mutes_chat ON mutes(chat_id);

            CREATE TABLE IF NOT EXISTS toxicity_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                score REAL NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_toxicity_scores_key
                ON toxicity_scores(chat_id, user_id);

            CREATE TABLE IF NOT EXISTS user_joins (
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                join_date TEXT NOT NULL,
                PRIMARY KEY (user_id, chat_id)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "mute_events",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mute_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                until TEXT NOT NULL,
                created_at TEXT NOT NULL,
                offense_count INTEGER NOT NULL,
                score REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mute_events_chat_until
                ON mute_events(chat_id, until);
        "#,
    },
];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    if current_version == 0 && legacy_mutes_exist(conn).await? {
        conn.execute("ALTER TABLE mutes RENAME TO legacy_mutes", ())
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!("Failed to set aside legacy mutes table: {e}"))
            })?;
        tracing::warn!(
            "Legacy single-chat mutes table found — renamed to legacy_mutes, \
             its rows carry no chat id and are not re-armed"
        );
    }

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        "Database migrations complete (at V{})",
        get_current_version(conn).await?
    );

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// A `mutes` table without a `chat_id` column is the legacy layout.
async fn legacy_mutes_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT
                (SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='mutes'),
                (SELECT COUNT(*) FROM pragma_table_info('mutes') WHERE name='chat_id')",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy tables: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => {
            let table: i64 = row.get(0).unwrap_or(0);
            let chat_column: i64 = row.get(1).unwrap_or(0);
            Ok(table > 0 && chat_column == 0)
        }
        None => Ok(false),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
