//! Escalation engine: turns a scored message into a moderation decision.
//!
//! For each message: classify, persist the score, recount the member's
//! qualifying offenses from the store, compare against the adjusted
//! threshold, and mute when both the message and the history call for it.
//! Everything after classification runs under a per-member lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ModerationConfig;
use crate::error::ModerationError;
use crate::moderation::accumulator::{ScoredMessage, ScoringAccumulator};
use crate::moderation::locks::KeyedLocks;
use crate::moderation::model::{ChatUserKey, MuteEvent, MuteRecord};
use crate::moderation::scheduler::UnmuteScheduler;
use crate::moderation::threshold::{Threshold, ThresholdPolicy};
use crate::platform::{ChatPlatform, IncomingMessage, escape_html};
use crate::store::Database;

/// Outcome of evaluating one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The classifier failed; nothing was recorded.
    Skipped,
    /// Posted by a member who is still muted in a chat that can't restrict
    /// them; the message was deleted without scoring.
    Suppressed { until: DateTime<Utc> },
    /// At or below the threshold.
    Clean { score: f64, threshold: f64 },
    /// Above the threshold, but not enough offenses on record to enforce.
    Warned {
        score: f64,
        threshold: f64,
        offenses: u32,
    },
    Muted {
        score: f64,
        threshold: f64,
        offenses: u32,
        until: DateTime<Utc>,
        duration_hours: i64,
    },
}

impl Decision {
    pub fn is_muted(&self) -> bool {
        matches!(self, Self::Muted { .. })
    }
}

pub struct EscalationEngine {
    store: Arc<dyn Database>,
    platform: Arc<dyn ChatPlatform>,
    scheduler: Arc<UnmuteScheduler>,
    accumulator: ScoringAccumulator,
    policy: ThresholdPolicy,
    config: ModerationConfig,
    locks: KeyedLocks,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn Database>,
        platform: Arc<dyn ChatPlatform>,
        scheduler: Arc<UnmuteScheduler>,
        accumulator: ScoringAccumulator,
        config: ModerationConfig,
    ) -> Self {
        Self {
            store,
            platform,
            scheduler,
            accumulator,
            policy: ThresholdPolicy::new(config.clone()),
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Evaluate one message at `now`.
    ///
    /// A classifier failure yields [`Decision::Skipped`]. A store failure
    /// aborts before any platform-side restriction is applied.
    pub async fn evaluate(
        &self,
        msg: &IncomingMessage,
        now: DateTime<Utc>,
    ) -> Result<Decision, ModerationError> {
        let key = msg.key();

        if !msg.chat_kind.supports_restriction() {
            if let Some(until) = self.live_mute_until(key, now).await? {
                if let Err(e) = self.platform.delete_message(msg.chat_id, msg.message_id).await {
                    warn!(%key, error = %e, "Could not delete message from muted member");
                }
                debug!(%key, %until, "Deleted message from muted member");
                return Ok(Decision::Suppressed { until });
            }
        }

        let scores = match self.accumulator.classify(&msg.text).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(%key, classifier = self.accumulator.classifier_name(), error = %e, "Message not scored");
                return Ok(Decision::Skipped);
            }
        };

        let guard = self.locks.lock(key).await;
        let result = async {
            let scored = self.accumulator.record(key, scores, now).await?;
            self.decide(msg, scored).await
        }
        .await;
        guard.unlock().await;
        result
    }

    async fn decide(
        &self,
        msg: &IncomingMessage,
        scored: ScoredMessage,
    ) -> Result<Decision, ModerationError> {
        let key = scored.key;
        let now = scored.at;
        let score = scored.effective;

        // A window reaching past the earliest representable time covers everything
        let since = self
            .config
            .offense_window
            .and_then(|window| now.checked_sub_signed(window));
        let offenses = self
            .store
            .count_scores_above(key, self.config.offense_score, since)
            .await?;
        let join_date = self.store.get_join(key).await?.map(|j| j.join_date);
        let threshold = self.policy.threshold(score, join_date, now);

        if !threshold.is_exceeded_by(score) {
            debug!(%key, score, threshold = threshold.value, offenses, "Message clean");
            return Ok(Decision::Clean {
                score,
                threshold: threshold.value,
            });
        }

        if offenses < self.config.min_offenses {
            info!(%key, score, threshold = threshold.value, offenses, "Toxic message below enforcement count");
            return Ok(Decision::Warned {
                score,
                threshold: threshold.value,
                offenses,
            });
        }

        self.mute(msg, key, score, threshold, offenses, now).await
    }

    async fn mute(
        &self,
        msg: &IncomingMessage,
        key: ChatUserKey,
        score: f64,
        threshold: Threshold,
        offenses: u32,
        now: DateTime<Utc>,
    ) -> Result<Decision, ModerationError> {
        let duration_hours = self.config.mute_duration_hours(offenses);
        let until = self
            .config
            .mute_duration(offenses)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(ModerationError::MuteDurationOutOfRange {
                offenses,
                hours: duration_hours,
            })?;
        if until <= now {
            return Err(ModerationError::InvalidMuteWindow { now, until });
        }

        self.store
            .upsert_mute(&MuteRecord { key, until })
            .await
            .map_err(|source| ModerationError::MuteNotPersisted {
                chat_id: key.chat_id,
                user_id: key.user_id,
                source,
            })?;

        let event = MuteEvent {
            key,
            until,
            created_at: now,
            offense_count: offenses,
            score,
        };
        if let Err(e) = self.store.insert_mute_event(&event).await {
            warn!(%key, error = %e, "Mute applied but not logged to history");
        }

        self.scheduler.schedule(key, until).await;
        self.enforce(msg, until, duration_hours).await;

        info!(
            %key,
            score,
            threshold = threshold.value,
            new_member = threshold.new_member,
            severe = threshold.severe,
            offenses,
            %until,
            "User muted"
        );

        Ok(Decision::Muted {
            score,
            threshold: threshold.value,
            offenses,
            until,
            duration_hours,
        })
    }

    /// Apply the mute on the platform. The record is already stored, so
    /// failures here only diverge the platform from the store.
    async fn enforce(&self, msg: &IncomingMessage, until: DateTime<Utc>, hours: i64) {
        let key = msg.key();
        let author = escape_html(&msg.author_label());

        let notice = if msg.chat_kind.supports_restriction() {
            if let Err(e) = self
                .platform
                .restrict(msg.chat_id, msg.user_id, false, Some(until))
                .await
            {
                warn!(%key, error = %e, "Mute stored but restriction failed");
            }
            format!("🚫 {author} has been muted for {hours} h for toxicity.")
        } else {
            if let Err(e) = self.platform.delete_message(msg.chat_id, msg.message_id).await {
                warn!(%key, error = %e, "Mute stored but message deletion failed");
            }
            format!(
                "🚫 {author} has been muted for {hours} h for toxicity. Their messages will be deleted."
            )
        };

        if let Err(e) = self.platform.send_message(msg.chat_id, &notice).await {
            warn!(%key, error = %e, "Could not send mute notice");
        }
    }

    async fn live_mute_until(
        &self,
        key: ChatUserKey,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ModerationError> {
        Ok(self
            .store
            .get_mute(key)
            .await?
            .filter(|mute| !mute.is_expired(now))
            .map(|mute| mute.until))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{SubsecRound, TimeDelta};

    use super::*;
    use crate::moderation::model::{ToxicityScoreRecord, UserJoinRecord};
    use crate::platform::ChatKind;
    use crate::testing::{Call, RecordingPlatform, StubClassifier, memory_store, message};

    struct Harness {
        engine: EscalationEngine,
        store: Arc<dyn Database>,
        platform: Arc<RecordingPlatform>,
        scheduler: Arc<UnmuteScheduler>,
        classifier: Arc<StubClassifier>,
    }

    async fn harness() -> Harness {
        harness_with(ModerationConfig::default()).await
    }

    async fn harness_with(config: ModerationConfig) -> Harness {
        let store = memory_store().await;
        let platform = Arc::new(RecordingPlatform::default());
        let classifier = Arc::new(StubClassifier::default());
        let scheduler = Arc::new(UnmuteScheduler::new(
            Arc::clone(&store),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
        ));
        let engine = EscalationEngine::new(
            Arc::clone(&store),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            Arc::clone(&scheduler),
            ScoringAccumulator::new(Arc::clone(&classifier) as _, Arc::clone(&store)),
            config,
        );
        Harness {
            engine,
            store,
            platform,
            scheduler,
            classifier,
        }
    }

    async fn seed_offenses(store: &Arc<dyn Database>, key: ChatUserKey, n: usize, at: DateTime<Utc>) {
        for _ in 0..n {
            store
                .insert_score(&ToxicityScoreRecord {
                    key,
                    score: 0.65,
                    timestamp: at,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn clean_message_records_score_only() {
        let h = harness().await;
        h.classifier.push(0.2);
        let msg = message(-100, 1, "hello");

        let decision = h.engine.evaluate(&msg, Utc::now()).await.unwrap();

        assert!(matches!(decision, Decision::Clean { .. }));
        assert_eq!(h.store.count_scores_above(msg.key(), 0.0, None).await.unwrap(), 1);
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn classifier_failure_writes_nothing() {
        let h = harness().await;
        let msg = message(-100, 1, "anything");

        let decision = h.engine.evaluate(&msg, Utc::now()).await.unwrap();

        assert_eq!(decision, Decision::Skipped);
        assert_eq!(h.store.count_scores_above(msg.key(), -1.0, None).await.unwrap(), 0);
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn toxic_without_history_is_warned() {
        let h = harness().await;
        h.classifier.push(0.85);
        let msg = message(-100, 1, "rude");

        let decision = h.engine.evaluate(&msg, Utc::now()).await.unwrap();

        assert!(matches!(decision, Decision::Warned { offenses: 1, .. }));
        assert!(h.store.get_mute(msg.key()).await.unwrap().is_none());
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn new_member_third_offense_mutes_for_five_hours() {
        let h = harness().await;
        // Stored timestamps keep microseconds
        let now = Utc::now().trunc_subsecs(6);
        let msg = message(-100, 1, "rude");
        let key = msg.key();
        h.store
            .record_join(&UserJoinRecord {
                key,
                join_date: now - TimeDelta::hours(1),
            })
            .await
            .unwrap();
        seed_offenses(&h.store, key, 2, now - TimeDelta::minutes(30)).await;
        h.classifier.push(0.70);

        let decision = h.engine.evaluate(&msg, now).await.unwrap();

        match decision {
            Decision::Muted {
                offenses,
                duration_hours,
                until,
                threshold,
                ..
            } => {
                assert_eq!(offenses, 3);
                assert_eq!(duration_hours, 5);
                assert_eq!(until, now + TimeDelta::hours(5));
                assert!((threshold - 0.68).abs() < 1e-9);
            }
            other => panic!("expected mute, got {other:?}"),
        }

        let mute = h.store.get_mute(key).await.unwrap().unwrap();
        assert_eq!(mute.until, now + TimeDelta::hours(5));
        assert_eq!(h.store.count_mute_events(-100).await.unwrap(), 1);
        assert_eq!(h.scheduler.pending(key).await, Some(mute.until));
        assert!(h.platform.calls().contains(&Call::Restrict {
            chat_id: -100,
            user_id: 1,
            allow_send: false,
            until: Some(mute.until),
        }));
        assert!(h.platform.sent()[0].contains("5 h"));
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn established_member_at_same_score_is_not_muted() {
        let h = harness().await;
        let now = Utc::now();
        let msg = message(-100, 1, "rude");
        seed_offenses(&h.store, msg.key(), 2, now).await;
        h.classifier.push(0.70);

        let decision = h.engine.evaluate(&msg, now).await.unwrap();

        assert!(matches!(decision, Decision::Clean { .. }));
        assert!(h.store.get_mute(msg.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn plain_group_deletes_and_then_suppresses() {
        let h = harness().await;
        let now = Utc::now();
        let mut msg = message(-7, 2, "rude");
        msg.chat_kind = ChatKind::Group;
        seed_offenses(&h.store, msg.key(), 3, now).await;
        h.classifier.push(0.95);

        let decision = h.engine.evaluate(&msg, now).await.unwrap();
        assert!(decision.is_muted());
        assert!(h.platform.calls().contains(&Call::Delete {
            chat_id: -7,
            message_id: msg.message_id,
        }));
        assert!(
            !h.platform
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Restrict { .. }))
        );

        msg.message_id += 1;
        let next = h
            .engine
            .evaluate(&msg, now + TimeDelta::minutes(1))
            .await
            .unwrap();
        assert!(matches!(next, Decision::Suppressed { .. }));
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn unrepresentable_mute_length_is_an_error() {
        let h = harness_with(ModerationConfig {
            escalation_every: 1,
            escalation_step_hours: i64::MAX / 4,
            ..ModerationConfig::default()
        })
        .await;
        let now = Utc::now();
        let msg = message(-100, 9, "rude");
        seed_offenses(&h.store, msg.key(), 3, now).await;
        h.classifier.push(0.99);

        let err = h.engine.evaluate(&msg, now).await.unwrap_err();

        assert!(matches!(
            err,
            ModerationError::MuteDurationOutOfRange { offenses: 4, .. }
        ));
        assert!(h.store.get_mute(msg.key()).await.unwrap().is_none());
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn restriction_failure_keeps_mute() {
        let h = harness().await;
        let now = Utc::now();
        let msg = message(-100, 3, "rude");
        seed_offenses(&h.store, msg.key(), 5, now).await;
        h.platform.fail_restrictions();
        h.classifier.push(0.99);

        let decision = h.engine.evaluate(&msg, now).await.unwrap();

        assert!(decision.is_muted());
        assert!(h.store.get_mute(msg.key()).await.unwrap().is_some());
        assert!(h.scheduler.pending(msg.key()).await.is_some());
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_messages_from_one_member_count_consistently() {
        let h = Arc::new(harness().await);
        for _ in 0..4 {
            h.classifier.push(0.95);
        }
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..4 {
            let h = Arc::clone(&h);
            handles.push(tokio::spawn(async move {
                let mut msg = message(-100, 9, "rude");
                msg.message_id = i;
                h.engine.evaluate(&msg, now).await.unwrap()
            }));
        }
        let mut muted = 0;
        let mut warned = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Decision::Muted { .. } => muted += 1,
                Decision::Warned { .. } => warned += 1,
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!((warned, muted), (2, 2));
        h.scheduler.shutdown().await;
    }
}
