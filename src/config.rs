//! Configuration types.
//!
//! Everything is read from environment variables. `from_env()` is a thin
//! wrapper over `from_lookup()`, which takes any key → value source so the
//! parsing rules can be exercised without touching the process environment.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Constants driving the threshold policy and the escalation engine.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Trigger threshold before any adjustment.
    pub base_threshold: f64,
    /// Subtracted from the threshold for recently joined members.
    pub new_member_discount: f64,
    /// How long after joining a member counts as new.
    pub new_member_window: TimeDelta,
    /// Effective scores above this count as a severely toxic single message.
    pub severe_score: f64,
    /// Subtracted from the threshold for severely toxic messages.
    pub severe_discount: f64,
    /// Historical scores above this count as a qualifying offense.
    pub offense_score: f64,
    /// Qualifying offenses needed before a mute is enforced.
    pub min_offenses: u32,
    /// Mute length for the first enforced mute.
    pub base_mute_hours: i64,
    /// Every this many offenses the mute grows by `escalation_step_hours`.
    pub escalation_every: u32,
    pub escalation_step_hours: i64,
    /// Only offenses newer than this count toward escalation. `None` counts
    /// the full history.
    pub offense_window: Option<TimeDelta>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.78,
            new_member_discount: 0.10,
            new_member_window: TimeDelta::hours(3),
            severe_score: 0.9,
            severe_discount: 0.10,
            offense_score: 0.6,
            min_offenses: 3,
            base_mute_hours: 3,
            escalation_every: 3,
            escalation_step_hours: 2,
            offense_window: None,
        }
    }
}

impl ModerationConfig {
    /// Mute length in hours for an escalation count of `offenses`.
    /// Saturates instead of overflowing for extreme settings.
    pub fn mute_duration_hours(&self, offenses: u32) -> i64 {
        let steps = i64::from(offenses / self.escalation_every.max(1));
        self.base_mute_hours
            .saturating_add(steps.saturating_mul(self.escalation_step_hours))
    }

    /// `None` when the hour count does not fit a `TimeDelta`.
    pub fn mute_duration(&self, offenses: u32) -> Option<TimeDelta> {
        TimeDelta::try_hours(self.mute_duration_hours(offenses))
    }

    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let grace_hours: i64 = parse_or(lookup, "ANTITOXIC_GRACE_HOURS", 3)?;
        let new_member_window = TimeDelta::try_hours(grace_hours)
            .filter(|d| *d >= TimeDelta::zero())
            .ok_or_else(|| out_of_range("ANTITOXIC_GRACE_HOURS", "must be 0 or more hours"))?;

        let offense_window = match parse_opt::<_, i64>(lookup, "ANTITOXIC_OFFENSE_WINDOW_DAYS")? {
            None => None,
            Some(days) => Some(
                TimeDelta::try_days(days)
                    .filter(|d| *d > TimeDelta::zero())
                    .ok_or_else(|| {
                        out_of_range("ANTITOXIC_OFFENSE_WINDOW_DAYS", "must be at least 1 day")
                    })?,
            ),
        };

        let config = Self {
            base_threshold: parse_or(lookup, "ANTITOXIC_BASE_THRESHOLD", defaults.base_threshold)?,
            new_member_window,
            min_offenses: parse_or(lookup, "ANTITOXIC_MIN_OFFENSES", defaults.min_offenses)?,
            base_mute_hours: parse_or(lookup, "ANTITOXIC_BASE_MUTE_HOURS", defaults.base_mute_hours)?,
            escalation_step_hours: parse_or(
                lookup,
                "ANTITOXIC_ESCALATION_STEP_HOURS",
                defaults.escalation_step_hours,
            )?,
            offense_window,
            ..defaults
        };

        if config.base_mute_hours <= 0 || TimeDelta::try_hours(config.base_mute_hours).is_none() {
            return Err(out_of_range("ANTITOXIC_BASE_MUTE_HOURS", "must be at least 1 hour"));
        }
        if config.escalation_step_hours < 0
            || TimeDelta::try_hours(config.escalation_step_hours).is_none()
        {
            return Err(out_of_range(
                "ANTITOXIC_ESCALATION_STEP_HOURS",
                "must be 0 or more hours",
            ));
        }
        Ok(config)
    }
}

fn out_of_range(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        message: message.into(),
    }
}

/// Who may run admin-only commands.
///
/// Stable numeric user ids are preferred; handles are accepted for
/// compatibility with handle-based deployments.
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    user_ids: HashSet<i64>,
    usernames: HashSet<String>,
}

impl AdminList {
    pub fn new(
        user_ids: impl IntoIterator<Item = i64>,
        usernames: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            user_ids: user_ids.into_iter().collect(),
            usernames: usernames
                .into_iter()
                .map(|u| u.trim_start_matches('@').to_string())
                .filter(|u| !u.is_empty())
                .collect(),
        }
    }

    /// Check whether a caller is an admin, by id or by handle.
    pub fn is_admin(&self, user_id: i64, username: Option<&str>) -> bool {
        if self.user_ids.contains(&user_id) {
            return true;
        }
        username
            .map(|u| u.trim_start_matches('@'))
            .is_some_and(|u| !u.is_empty() && self.usernames.contains(u))
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty() && self.usernames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.user_ids.len() + self.usernames.len()
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: SecretString,
    pub perspective_api_key: SecretString,
    pub perspective_timeout: Duration,
    pub perspective_languages: Vec<String>,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub admins: AdminList,
    pub moderation: ModerationConfig,
}

impl BotConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key → value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram_token = required(&lookup, "TELEGRAM_BOT_TOKEN")?;
        let perspective_api_key = required(&lookup, "PERSPECTIVE_API_KEY")?;

        let admin_ids = split_list(lookup("ADMIN_USER_IDS"))
            .into_iter()
            .map(|raw| {
                raw.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                    key: "ADMIN_USER_IDS".into(),
                    message: format!("'{raw}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let admins = AdminList::new(admin_ids, split_list(lookup("ADMIN_USERNAMES")));

        let timeout_secs: u64 = parse_or(&lookup, "PERSPECTIVE_TIMEOUT_SECS", 10)?;

        Ok(Self {
            telegram_token: SecretString::from(telegram_token),
            perspective_api_key: SecretString::from(perspective_api_key),
            perspective_timeout: Duration::from_secs(timeout_secs),
            perspective_languages: split_list(lookup("PERSPECTIVE_LANGUAGES")),
            db_path: lookup("ANTITOXIC_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/antitoxic.db")),
            log_dir: lookup("ANTITOXIC_LOG_DIR").map(PathBuf::from),
            admins,
            moderation: ModerationConfig::from_lookup(&lookup)?,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_opt<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
        _ => Ok(None),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
