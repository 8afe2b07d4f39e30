//! Read-only moderation reports.

use std::sync::Arc;

use tracing::debug;

use crate::error::DatabaseError;
use crate::moderation::model::{LeaderboardEntry, MuteEvent, MuteRecord};
use crate::platform::ChatPlatform;
use crate::store::Database;

pub const LEADERBOARD_SIZE: usize = 10;
pub const HISTORY_PAGE_SIZE: usize = 10;

/// A live mute with the member's display name.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveMute {
    pub record: MuteRecord,
    pub display_name: String,
}

/// One page of mute history. Pages are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub page: usize,
    pub page_count: usize,
    pub total: u64,
    pub entries: Vec<MuteEvent>,
}

pub fn page_count(total: u64, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    usize::try_from(total)
        .unwrap_or(usize::MAX)
        .div_ceil(page_size)
}

pub struct Reporting {
    store: Arc<dyn Database>,
    platform: Arc<dyn ChatPlatform>,
}

impl Reporting {
    pub fn new(store: Arc<dyn Database>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self { store, platform }
    }

    /// Live mutes of a chat in store order. Members whose name can't be
    /// looked up are shown by id.
    pub async fn active_mutes(&self, chat_id: i64) -> Result<Vec<ActiveMute>, DatabaseError> {
        let records = self.store.list_mutes(chat_id).await?;
        let mut out = Vec::with_capacity(records.len());

        for record in records {
            let display_name = match self
                .platform
                .member_display_name(chat_id, record.key.user_id)
                .await
            {
                Ok(name) => name,
                Err(e) => {
                    debug!(key = %record.key, error = %e, "Display name lookup failed");
                    record.key.user_id.to_string()
                }
            };
            out.push(ActiveMute {
                record,
                display_name,
            });
        }
        Ok(out)
    }

    pub async fn leaderboard(&self, chat_id: i64) -> Result<Vec<LeaderboardEntry>, DatabaseError> {
        self.store.leaderboard(chat_id, LEADERBOARD_SIZE).await
    }

    /// Page 0 and pages past the end come back empty.
    pub async fn history(&self, chat_id: i64, page: usize) -> Result<HistoryPage, DatabaseError> {
        let total = self.store.count_mute_events(chat_id).await?;
        let page_count = page_count(total, HISTORY_PAGE_SIZE);

        let entries = if page == 0 || page > page_count {
            Vec::new()
        } else {
            self.store
                .list_mute_events(chat_id, HISTORY_PAGE_SIZE, (page - 1) * HISTORY_PAGE_SIZE)
                .await?
        };

        Ok(HistoryPage {
            page,
            page_count,
            total,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::moderation::model::{ChatUserKey, ToxicityScoreRecord};
    use crate::testing::{RecordingPlatform, memory_store};

    async fn reporting() -> (Reporting, Arc<dyn Database>, Arc<RecordingPlatform>) {
        let store = memory_store().await;
        let platform = Arc::new(RecordingPlatform::default());
        let reporting = Reporting::new(
            Arc::clone(&store),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
        );
        (reporting, store, platform)
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0, 10), 0);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(11, 10), 2);
        assert_eq!(page_count(23, 10), 3);
    }

    #[tokio::test]
    async fn history_pagination() {
        let (reporting, store, _) = reporting().await;
        let base = Utc::now();
        for i in 0..23 {
            store
                .insert_mute_event(&MuteEvent {
                    key: ChatUserKey::new(-1, i),
                    until: base + TimeDelta::minutes(i),
                    created_at: base,
                    offense_count: 3,
                    score: 0.9,
                })
                .await
                .unwrap();
        }

        let first = reporting.history(-1, 1).await.unwrap();
        assert_eq!(first.page_count, 3);
        assert_eq!(first.total, 23);
        assert_eq!(first.entries.len(), 10);
        assert_eq!(first.entries[0].key.user_id, 22);

        assert_eq!(reporting.history(-1, 3).await.unwrap().entries.len(), 3);
        assert!(reporting.history(-1, 4).await.unwrap().entries.is_empty());
        assert!(reporting.history(-1, 0).await.unwrap().entries.is_empty());
        assert!(reporting.history(-2, 1).await.unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn active_mutes_fall_back_to_id() {
        let (reporting, store, platform) = reporting().await;
        platform.set_name(1, "Alice");
        let until = Utc::now() + TimeDelta::hours(3);
        for user in [1, 2] {
            store
                .upsert_mute(&MuteRecord {
                    key: ChatUserKey::new(-1, user),
                    until,
                })
                .await
                .unwrap();
        }

        let mut names: Vec<_> = reporting
            .active_mutes(-1)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.display_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["2".to_string(), "Alice".to_string()]);
    }

    #[tokio::test]
    async fn leaderboard_caps_at_ten() {
        let (reporting, store, _) = reporting().await;
        for user in 0..15 {
            store
                .insert_score(&ToxicityScoreRecord {
                    key: ChatUserKey::new(-1, user),
                    score: f64::from(user as i32) / 20.0,
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }

        let board = reporting.leaderboard(-1).await.unwrap();
        assert_eq!(board.len(), LEADERBOARD_SIZE);
        assert_eq!(board[0].user_id, 14);
        assert!(board.windows(2).all(|w| w[0].average_score >= w[1].average_score));
    }
}
