//! Moderation records and the composite chat/user identity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a member within one chat. All moderation state is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatUserKey {
    pub chat_id: i64,
    pub user_id: i64,
}

impl ChatUserKey {
    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

impl fmt::Display for ChatUserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

/// One evaluated message. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicityScoreRecord {
    pub key: ChatUserKey,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// A live mute. At most one per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteRecord {
    pub key: ChatUserKey,
    pub until: DateTime<Utc>,
}

impl MuteRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.until <= now
    }
}

/// When a member joined a chat. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJoinRecord {
    pub key: ChatUserKey,
    pub join_date: DateTime<Utc>,
}

/// A mute as it was applied, kept after the mute is lifted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteEvent {
    pub key: ChatUserKey,
    pub until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Escalation count at the time of the mute.
    pub offense_count: u32,
    /// Effective score of the message that triggered it.
    pub score: f64,
}

/// Per-user average for the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub average_score: f64,
    pub samples: u64,
}
