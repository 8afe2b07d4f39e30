//! Scoring accumulator: classify a message and append its score.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::classifier::{CategoryScores, ToxicityClassifier};
use crate::error::{ClassifierError, DatabaseError};
use crate::moderation::model::{ChatUserKey, ToxicityScoreRecord};
use crate::store::Database;

/// A message's scores after they were persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMessage {
    pub key: ChatUserKey,
    pub scores: CategoryScores,
    pub effective: f64,
    pub at: DateTime<Utc>,
}

pub struct ScoringAccumulator {
    classifier: Arc<dyn ToxicityClassifier>,
    store: Arc<dyn Database>,
}

impl ScoringAccumulator {
    pub fn new(classifier: Arc<dyn ToxicityClassifier>, store: Arc<dyn Database>) -> Self {
        Self { classifier, store }
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    pub async fn classify(&self, text: &str) -> Result<CategoryScores, ClassifierError> {
        self.classifier.score(text).await
    }

    /// Append one score record holding the effective score.
    pub async fn record(
        &self,
        key: ChatUserKey,
        scores: CategoryScores,
        at: DateTime<Utc>,
    ) -> Result<ScoredMessage, DatabaseError> {
        let effective = scores.effective();
        self.store
            .insert_score(&ToxicityScoreRecord {
                key,
                score: effective,
                timestamp: at,
            })
            .await?;

        Ok(ScoredMessage {
            key,
            scores,
            effective,
            at,
        })
    }
}
