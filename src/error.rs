//! Error types for antitoxic.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Moderation error: {0}")]
    Moderation(#[from] ModerationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Toxicity classifier errors.
///
/// Every variant means "this message is not scored"; none of them is fatal.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Classifier {provider} quota exceeded")]
    QuotaExceeded { provider: String },

    #[error("Classifier {provider} rejected input: {reason}")]
    InvalidInput { provider: String, reason: String },

    #[error("Classifier {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Chat platform errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Platform {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Platform {name} call {method} failed: {reason}")]
    CallFailed {
        name: String,
        method: String,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Errors surfaced by the moderation core.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("Mute record for chat {chat_id} user {user_id} could not be persisted: {source}")]
    MuteNotPersisted {
        chat_id: i64,
        user_id: i64,
        #[source]
        source: DatabaseError,
    },

    #[error("Invalid mute window: until {until} is not after {now}")]
    InvalidMuteWindow {
        now: chrono::DateTime<chrono::Utc>,
        until: chrono::DateTime<chrono::Utc>,
    },

    #[error("Mute of {hours}h for {offenses} offenses is out of range")]
    MuteDurationOutOfRange { offenses: u32, hours: i64 },

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn create_log_dir(fail: bool) -> Result<()> {
        if fail {
            let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
            Err(ConfigError::from(io))?;
        }
        Ok(())
    }

    fn start(fail: bool) -> Result<()> {
        if fail {
            Err(PlatformError::StartupFailed {
                name: "telegram".into(),
                reason: "unauthorized".into(),
            })?;
        }
        Ok(())
    }

    #[test]
    fn io_failures_surface_as_config_errors() {
        assert!(create_log_dir(false).is_ok());
        let err = create_log_dir(true).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Io(_))));
        assert_eq!(err.to_string(), "Configuration error: IO error: denied");
    }

    #[test]
    fn component_errors_convert_to_top_level() {
        let err = start(true).unwrap_err();
        assert!(matches!(err, Error::Platform(PlatformError::StartupFailed { .. })));

        let err: Error = ClassifierError::QuotaExceeded {
            provider: "perspective".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Classifier error: Classifier perspective quota exceeded"
        );
    }
}
