//! `Database` trait: the single async interface for moderation persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::moderation::model::{
    ChatUserKey, LeaderboardEntry, MuteEvent, MuteRecord, ToxicityScoreRecord, UserJoinRecord,
};

/// Backend-agnostic database trait covering scores, mutes, joins and the
/// mute event log.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Scores ──────────────────────────────────────────────────────

    /// Append one score record.
    async fn insert_score(&self, record: &ToxicityScoreRecord) -> Result<(), DatabaseError>;

    /// Count score records for `key` strictly above `min_score`, optionally
    /// only those newer than `since`.
    async fn count_scores_above(
        &self,
        key: ChatUserKey,
        min_score: f64,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32, DatabaseError>;

    /// Top users of a chat by average score, highest first.
    async fn leaderboard(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, DatabaseError>;

    // ── Mutes ───────────────────────────────────────────────────────

    /// Insert or replace the live mute for a key.
    async fn upsert_mute(&self, record: &MuteRecord) -> Result<(), DatabaseError>;

    async fn get_mute(&self, key: ChatUserKey) -> Result<Option<MuteRecord>, DatabaseError>;

    /// Delete the live mute for a key. Returns whether a record existed.
    async fn delete_mute(&self, key: ChatUserKey) -> Result<bool, DatabaseError>;

    /// Live mutes of one chat, in store order.
    async fn list_mutes(&self, chat_id: i64) -> Result<Vec<MuteRecord>, DatabaseError>;

    /// Live mutes across all chats.
    async fn list_all_mutes(&self) -> Result<Vec<MuteRecord>, DatabaseError>;

    // ── Joins ───────────────────────────────────────────────────────

    /// Record a join if none exists yet. Returns whether it was inserted.
    async fn record_join(&self, record: &UserJoinRecord) -> Result<bool, DatabaseError>;

    async fn get_join(&self, key: ChatUserKey) -> Result<Option<UserJoinRecord>, DatabaseError>;

    // ── Mute event log ──────────────────────────────────────────────

    async fn insert_mute_event(&self, event: &MuteEvent) -> Result<(), DatabaseError>;

    async fn count_mute_events(&self, chat_id: i64) -> Result<u64, DatabaseError>;

    /// Mute events of one chat ordered by `until` descending.
    async fn list_mute_events(
        &self,
        chat_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MuteEvent>, DatabaseError>;
}
