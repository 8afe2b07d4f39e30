//! Unmute scheduler: one-shot timers that lift mutes.
//!
//! At most one pending job exists per `ChatUserKey`; scheduling again
//! aborts and replaces the previous job. The timer path and the manual
//! command path both end in [`UnmuteScheduler::unmute`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::moderation::model::ChatUserKey;
use crate::platform::{ChatPlatform, mention};
use crate::store::Database;

/// What started an unmute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmuteTrigger {
    Timer,
    Manual { by: i64 },
}

/// Result of one unmute run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnmuteOutcome {
    /// A live mute record existed and was deleted.
    pub had_record: bool,
    /// Send permission was restored on the platform.
    pub restored: bool,
    /// The chat was told the member is unblocked.
    pub notified: bool,
}

/// Counts from the startup recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub rescheduled: usize,
    pub expired: usize,
    pub failed: usize,
}

struct PendingUnmute {
    id: Uuid,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

pub struct UnmuteScheduler {
    store: Arc<dyn Database>,
    platform: Arc<dyn ChatPlatform>,
    jobs: Mutex<HashMap<ChatUserKey, PendingUnmute>>,
}

impl UnmuteScheduler {
    pub fn new(store: Arc<dyn Database>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            store,
            platform,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Arrange a timer unmute at `fire_at`, replacing any pending one.
    /// A `fire_at` in the past fires immediately.
    pub async fn schedule(self: &Arc<Self>, key: ChatUserKey, fire_at: DateTime<Utc>) {
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let id = Uuid::new_v4();

        // Held across spawn + insert so a zero-delay job can't look for its
        // entry before it exists.
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(&key) {
            previous.handle.abort();
            debug!(%key, previous = %previous.fire_at, "Replaced pending unmute");
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.finish_job(key, id).await;
            if let Err(e) = this.unmute(key, UnmuteTrigger::Timer).await {
                error!(%key, error = %e, "Scheduled unmute failed");
            }
        });

        jobs.insert(
            key,
            PendingUnmute {
                id,
                fire_at,
                handle,
            },
        );
        debug!(%key, %fire_at, "Unmute scheduled");
    }

    /// Drop the job's own entry, unless it has been replaced meanwhile.
    async fn finish_job(&self, key: ChatUserKey, id: Uuid) {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(&key).is_some_and(|job| job.id == id) {
            jobs.remove(&key);
        }
    }

    /// Lift a mute. Safe to call any number of times.
    ///
    /// A timer that finds no record does nothing further; a manual unmute
    /// always restores permission and notifies. Only a store failure is an
    /// error; platform failures are logged.
    pub async fn unmute(
        &self,
        key: ChatUserKey,
        trigger: UnmuteTrigger,
    ) -> Result<UnmuteOutcome, DatabaseError> {
        let had_record = self.store.delete_mute(key).await?;
        let mut outcome = UnmuteOutcome {
            had_record,
            ..Default::default()
        };

        if !had_record && trigger == UnmuteTrigger::Timer {
            debug!(%key, "Timer fired with no live mute");
            return Ok(outcome);
        }

        match self.platform.chat_kind(key.chat_id).await {
            Ok(kind) if kind.supports_restriction() => {
                match self
                    .platform
                    .restrict(key.chat_id, key.user_id, true, None)
                    .await
                {
                    Ok(()) => outcome.restored = true,
                    Err(e) => warn!(%key, error = %e, "Could not restore send permission"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%key, error = %e, "Could not look up chat type"),
        }

        let label = self
            .platform
            .member_display_name(key.chat_id, key.user_id)
            .await
            .unwrap_or_else(|_| key.user_id.to_string());
        let notice = format!("✅ {} has been unblocked.", mention(key.user_id, &label));
        match self.platform.send_message(key.chat_id, &notice).await {
            Ok(()) => outcome.notified = true,
            Err(e) => warn!(%key, error = %e, "Could not send unmute notice"),
        }

        match trigger {
            UnmuteTrigger::Timer => info!(%key, "User unmuted by timer"),
            UnmuteTrigger::Manual { by } => info!(%key, by, had_record, "User unmuted manually"),
        }
        Ok(outcome)
    }

    /// Fire time of the pending job for `key`, if any.
    pub async fn pending(&self, key: ChatUserKey) -> Option<DateTime<Utc>> {
        self.jobs.lock().await.get(&key).map(|job| job.fire_at)
    }

    pub async fn pending_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Re-arm every persisted mute after a restart. Expired mutes are lifted
    /// right away.
    pub async fn recover(self: &Arc<Self>, now: DateTime<Utc>) -> Result<RecoveryReport, DatabaseError> {
        let mut report = RecoveryReport::default();

        for mute in self.store.list_all_mutes().await? {
            if mute.until > now {
                self.schedule(mute.key, mute.until).await;
                report.rescheduled += 1;
                continue;
            }
            match self.unmute(mute.key, UnmuteTrigger::Timer).await {
                Ok(_) => report.expired += 1,
                Err(e) => {
                    error!(key = %mute.key, error = %e, "Failed to lift expired mute");
                    report.failed += 1;
                }
            }
        }

        info!(
            rescheduled = report.rescheduled,
            expired = report.expired,
            failed = report.failed,
            "Mute recovery complete"
        );
        Ok(report)
    }

    /// Abort every pending job.
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }
}
