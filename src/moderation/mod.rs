//! Moderation core.
//!
//! [`Moderator`] wires the pieces together over one store and one platform:
//! the escalation engine for incoming messages, the unmute scheduler for
//! timer and manual unmutes, and the read-only reports.

pub mod accumulator;
pub mod escalation;
pub mod locks;
pub mod model;
pub mod reporting;
pub mod scheduler;
pub mod threshold;

pub use escalation::{Decision, EscalationEngine};
pub use model::ChatUserKey;
pub use reporting::{ActiveMute, HistoryPage, Reporting};
pub use scheduler::{RecoveryReport, UnmuteOutcome, UnmuteScheduler, UnmuteTrigger};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::classifier::ToxicityClassifier;
use crate::config::ModerationConfig;
use crate::error::{DatabaseError, ModerationError};
use crate::moderation::accumulator::ScoringAccumulator;
use crate::moderation::model::UserJoinRecord;
use crate::platform::{ChatPlatform, IncomingMessage};
use crate::store::Database;

pub struct Moderator {
    store: Arc<dyn Database>,
    engine: EscalationEngine,
    scheduler: Arc<UnmuteScheduler>,
    reporting: Reporting,
}

impl Moderator {
    pub fn new(
        store: Arc<dyn Database>,
        classifier: Arc<dyn ToxicityClassifier>,
        platform: Arc<dyn ChatPlatform>,
        config: ModerationConfig,
    ) -> Self {
        let scheduler = Arc::new(UnmuteScheduler::new(
            Arc::clone(&store),
            Arc::clone(&platform),
        ));
        let accumulator = ScoringAccumulator::new(classifier, Arc::clone(&store));
        let engine = EscalationEngine::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            Arc::clone(&scheduler),
            accumulator,
            config,
        );
        let reporting = Reporting::new(Arc::clone(&store), platform);

        Self {
            store,
            engine,
            scheduler,
            reporting,
        }
    }

    pub async fn evaluate(
        &self,
        msg: &IncomingMessage,
        now: DateTime<Utc>,
    ) -> Result<Decision, ModerationError> {
        self.engine.evaluate(msg, now).await
    }

    /// Record when a member joined. The first recorded join wins.
    pub async fn record_join(
        &self,
        key: ChatUserKey,
        joined_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let inserted = self
            .store
            .record_join(&UserJoinRecord {
                key,
                join_date: joined_at,
            })
            .await?;
        debug!(%key, inserted, "Join recorded");
        Ok(inserted)
    }

    /// Unmute on behalf of an admin. Authorization is the caller's job.
    pub async fn manual_unmute(
        &self,
        key: ChatUserKey,
        by: i64,
    ) -> Result<UnmuteOutcome, DatabaseError> {
        self.scheduler.unmute(key, UnmuteTrigger::Manual { by }).await
    }

    /// Re-arm persisted mutes after a restart.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<RecoveryReport, DatabaseError> {
        self.scheduler.recover(now).await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    pub fn scheduler(&self) -> &Arc<UnmuteScheduler> {
        &self.scheduler
    }

    pub fn reporting(&self) -> &Reporting {
        &self.reporting
    }
}
