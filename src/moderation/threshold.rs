//! Per-message trigger threshold.

use chrono::{DateTime, Utc};

use crate::config::ModerationConfig;

/// The computed threshold and which adjustments applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub value: f64,
    pub new_member: bool,
    pub severe: bool,
}

impl Threshold {
    /// Strictly greater: a score equal to the threshold does not trigger.
    pub fn is_exceeded_by(&self, score: f64) -> bool {
        score > self.value
    }
}

/// Base threshold minus the new-member and high-severity discounts.
/// No clamping is applied.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    config: ModerationConfig,
}

impl ThresholdPolicy {
    pub fn new(config: ModerationConfig) -> Self {
        Self { config }
    }

    /// A member is new while less than the grace window has passed since
    /// they joined. Unknown join date means not new.
    pub fn is_new_member(&self, join_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        join_date.is_some_and(|joined| now - joined < self.config.new_member_window)
    }

    pub fn is_severe(&self, effective_score: f64) -> bool {
        effective_score > self.config.severe_score
    }

    pub fn threshold(
        &self,
        effective_score: f64,
        join_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Threshold {
        let new_member = self.is_new_member(join_date, now);
        let severe = self.is_severe(effective_score);

        let mut value = self.config.base_threshold;
        if new_member {
            value -= self.config.new_member_discount;
        }
        if severe {
            value -= self.config.severe_discount;
        }

        Threshold {
            value,
            new_member,
            severe,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn policy() -> ThresholdPolicy {
        ThresholdPolicy::new(ModerationConfig::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn base_threshold_for_established_member() {
        let now = Utc::now();
        let t = policy().threshold(0.5, Some(now - TimeDelta::days(10)), now);
        assert!(approx(t.value, 0.78));
        assert!(!t.new_member && !t.severe);
    }

    #[test]
    fn missing_join_record_is_not_new() {
        let now = Utc::now();
        let t = policy().threshold(0.7, None, now);
        assert!(approx(t.value, 0.78));
        assert!(!t.new_member);
    }

    #[test]
    fn new_member_discount() {
        let now = Utc::now();
        let t = policy().threshold(0.70, Some(now - TimeDelta::hours(1)), now);
        assert!(approx(t.value, 0.68));
        assert!(t.new_member);
        assert!(t.is_exceeded_by(0.70));
    }

    #[test]
    fn grace_window_is_exclusive() {
        let now = Utc::now();
        let p = policy();
        assert!(p.is_new_member(Some(now - TimeDelta::hours(3) + TimeDelta::seconds(1)), now));
        assert!(!p.is_new_member(Some(now - TimeDelta::hours(3)), now));
    }

    #[test]
    fn severe_message_discount() {
        let now = Utc::now();
        let t = policy().threshold(0.95, None, now);
        assert!(approx(t.value, 0.68));
        assert!(t.severe);
    }

    #[test]
    fn severe_cutoff_is_strict() {
        let t = policy().threshold(0.9, None, Utc::now());
        assert!(!t.severe);
        assert!(approx(t.value, 0.78));
    }

    #[test]
    fn discounts_stack() {
        let now = Utc::now();
        let t = policy().threshold(0.95, Some(now - TimeDelta::minutes(5)), now);
        assert!(approx(t.value, 0.58));
    }

    #[test]
    fn equality_does_not_trigger() {
        let t = policy().threshold(0.5, None, Utc::now());
        assert!(!t.is_exceeded_by(t.value));
        assert!(t.is_exceeded_by(t.value + 1e-6));
    }

    #[test]
    fn scores_at_or_below_threshold_never_exceed() {
        let now = Utc::now();
        let p = policy();
        for i in 0..=100 {
            let score = f64::from(i) / 100.0;
            for join in [None, Some(now - TimeDelta::hours(1))] {
                let t = p.threshold(score, join, now);
                if score <= t.value {
                    assert!(!t.is_exceeded_by(score));
                }
            }
        }
    }
}
