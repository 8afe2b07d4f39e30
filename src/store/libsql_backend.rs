//! libSQL backend for the async `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::moderation::model::{
    ChatUserKey, LeaderboardEntry, MuteEvent, MuteRecord, ToxicityScoreRecord, UserJoinRecord,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width UTC timestamps so that text comparison in SQL orders correctly.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn count_to_u32(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

/// Column order: 0:user_id, 1:chat_id, 2:until
fn row_to_mute(row: &libsql::Row) -> Result<MuteRecord, libsql::Error> {
    let until: String = row.get(2)?;
    Ok(MuteRecord {
        key: ChatUserKey::new(row.get(1)?, row.get(0)?),
        until: parse_datetime(&until),
    })
}

/// Column order: 0:user_id, 1:chat_id, 2:until, 3:created_at, 4:offense_count, 5:score
fn row_to_mute_event(row: &libsql::Row) -> Result<MuteEvent, libsql::Error> {
    let until: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let offense_count: i64 = row.get(4)?;
    Ok(MuteEvent {
        key: ChatUserKey::new(row.get(1)?, row.get(0)?),
        until: parse_datetime(&until),
        created_at: parse_datetime(&created_at),
        offense_count: count_to_u32(offense_count),
        score: row.get(5)?,
    })
}

async fn collect_mutes(mut rows: libsql::Rows) -> Vec<MuteRecord> {
    let mut mutes = Vec::new();
    while let Ok(Some(row)) = rows.next().await {
        match row_to_mute(&row) {
            Ok(mute) => mutes.push(mute),
            Err(e) => tracing::warn!("Skipping mute row: {e}"),
        }
    }
    mutes
}

// ── Trait implementation ────────────────────────────────────────────

const MUTE_COLUMNS: &str = "user_id, chat_id, until";

const MUTE_EVENT_COLUMNS: &str = "user_id, chat_id, until, created_at, offense_count, score";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Scores ──────────────────────────────────────────────────────

    async fn insert_score(&self, record: &ToxicityScoreRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO toxicity_scores (user_id, chat_id, score, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.key.user_id,
                    record.key.chat_id,
                    record.score,
                    format_datetime(record.timestamp),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_score: {e}")))?;

        debug!(key = %record.key, score = record.score, "Score recorded");
        Ok(())
    }

    async fn count_scores_above(
        &self,
        key: ChatUserKey,
        min_score: f64,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32, DatabaseError> {
        let conn = self.conn();
        let mut rows = match since {
            Some(since) => {
                conn.query(
                    "SELECT COUNT(*) FROM toxicity_scores WHERE chat_id = ?1 AND user_id = ?2 AND score > ?3 AND timestamp > ?4",
                    params![key.chat_id, key.user_id, min_score, format_datetime(since)],
                )
                .await
            }
            None => {
                conn.query(
                    "SELECT COUNT(*) FROM toxicity_scores WHERE chat_id = ?1 AND user_id = ?2 AND score > ?3",
                    params![key.chat_id, key.user_id, min_score],
                )
                .await
            }
        }
        .map_err(|e| DatabaseError::Query(format!("count_scores_above: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_scores_above: {e}")))?;

        match row {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_scores_above: {e}")))?;
                Ok(count_to_u32(count))
            }
            None => Ok(0),
        }
    }

    async fn leaderboard(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, AVG(score) AS average, COUNT(*) FROM toxicity_scores
                 WHERE chat_id = ?1
                 GROUP BY user_id
                 ORDER BY average DESC, user_id ASC
                 LIMIT ?2",
                params![chat_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("leaderboard: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let entry = (|| -> Result<LeaderboardEntry, libsql::Error> {
                let samples: i64 = row.get(2)?;
                Ok(LeaderboardEntry {
                    user_id: row.get(0)?,
                    average_score: row.get(1)?,
                    samples: samples.max(0) as u64,
                })
            })();
            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping leaderboard row: {e}"),
            }
        }
        Ok(entries)
    }

    // ── Mutes ───────────────────────────────────────────────────────

    async fn upsert_mute(&self, record: &MuteRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO mutes (user_id, chat_id, until) VALUES (?1, ?2, ?3)",
                params![
                    record.key.user_id,
                    record.key.chat_id,
                    format_datetime(record.until),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_mute: {e}")))?;
        Ok(())
    }

    async fn get_mute(&self, key: ChatUserKey) -> Result<Option<MuteRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MUTE_COLUMNS} FROM mutes WHERE user_id = ?1 AND chat_id = ?2"),
                params![key.user_id, key.chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_mute: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_mute(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_mute: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_mute: {e}"))),
        }
    }

    async fn delete_mute(&self, key: ChatUserKey) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM mutes WHERE user_id = ?1 AND chat_id = ?2",
                params![key.user_id, key.chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_mute: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_mutes(&self, chat_id: i64) -> Result<Vec<MuteRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {MUTE_COLUMNS} FROM mutes WHERE chat_id = ?1"),
                params![chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_mutes: {e}")))?;
        Ok(collect_mutes(rows).await)
    }

    async fn list_all_mutes(&self) -> Result<Vec<MuteRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(&format!("SELECT {MUTE_COLUMNS} FROM mutes"), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_all_mutes: {e}")))?;
        Ok(collect_mutes(rows).await)
    }

    // ── Joins ───────────────────────────────────────────────────────

    async fn record_join(&self, record: &UserJoinRecord) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO user_joins (user_id, chat_id, join_date) VALUES (?1, ?2, ?3)",
                params![
                    record.key.user_id,
                    record.key.chat_id,
                    format_datetime(record.join_date),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_join: {e}")))?;
        Ok(affected > 0)
    }

    async fn get_join(&self, key: ChatUserKey) -> Result<Option<UserJoinRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT join_date FROM user_joins WHERE user_id = ?1 AND chat_id = ?2",
                params![key.user_id, key.chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_join: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let join_date: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_join: {e}")))?;
                Ok(Some(UserJoinRecord {
                    key,
                    join_date: parse_datetime(&join_date),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_join: {e}"))),
        }
    }

    // ── Mute event log ──────────────────────────────────────────────

    async fn insert_mute_event(&self, event: &MuteEvent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO mute_events (user_id, chat_id, until, created_at, offense_count, score) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.key.user_id,
                    event.key.chat_id,
                    format_datetime(event.until),
                    format_datetime(event.created_at),
                    i64::from(event.offense_count),
                    event.score,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_mute_event: {e}")))?;
        Ok(())
    }

    async fn count_mute_events(&self, chat_id: i64) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM mute_events WHERE chat_id = ?1",
                params![chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_mute_events: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_mute_events: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_mute_events: {e}"))),
        }
    }

    async fn list_mute_events(
        &self,
        chat_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MuteEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MUTE_EVENT_COLUMNS} FROM mute_events WHERE chat_id = ?1 ORDER BY until DESC, id DESC LIMIT ?2 OFFSET ?3"
                ),
                params![chat_id, limit as i64, offset as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_mute_events: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_mute_event(&row) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping mute event row: {e}"),
            }
        }
        Ok(events)
    }
}
