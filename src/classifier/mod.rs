//! Toxicity classifier gateway.
//!
//! The moderation core only sees the `ToxicityClassifier` trait; the
//! Perspective adapter is one implementation, tests use stubs.

pub mod perspective;

pub use perspective::PerspectiveClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

/// Per-category scores for one message, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub toxicity: f64,
    pub severe_toxicity: f64,
    pub sexually_explicit: f64,
    pub insult: f64,
}

impl CategoryScores {
    /// The highest category value, which is what the engine works with.
    pub fn effective(&self) -> f64 {
        [
            self.toxicity,
            self.severe_toxicity,
            self.sexually_explicit,
            self.insult,
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

/// Scores message text for toxicity.
#[async_trait]
pub trait ToxicityClassifier: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn score(&self, text: &str) -> Result<CategoryScores, ClassifierError>;
}
