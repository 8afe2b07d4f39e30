use std::sync::Arc;

use chrono::Utc;
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use antitoxic::bot::Bot;
use antitoxic::classifier::{PerspectiveClient, ToxicityClassifier};
use antitoxic::commands::CommandHandler;
use antitoxic::config::BotConfig;
use antitoxic::error::{ConfigError, Result};
use antitoxic::moderation::Moderator;
use antitoxic::platform::{ChatPlatform, TelegramPlatform};
use antitoxic::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<()> {
    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TELEGRAM_BOT_TOKEN=123456:ABC...");
        eprintln!("  export PERSPECTIVE_API_KEY=AIza...");
        std::process::exit(1);
    });

    // ── Logging ──────────────────────────────────────────────────────────
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(ConfigError::from)?;
            let appender = tracing_appender::rolling::daily(dir, "antitoxic.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("🛡 antitoxic v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Admins: {}", config.admins.len());
    if config.admins.is_empty() {
        tracing::warn!("No admins configured; /unmute is unavailable");
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let classifier: Arc<dyn ToxicityClassifier> = Arc::new(
        PerspectiveClient::new(
            config.perspective_api_key.clone(),
            config.perspective_timeout,
        )?
        .with_languages(config.perspective_languages.clone()),
    );
    let platform: Arc<dyn ChatPlatform> = Arc::new(TelegramPlatform::new(
        config.telegram_token.expose_secret().to_string(),
    ));

    let moderator = Arc::new(Moderator::new(
        Arc::clone(&db),
        classifier,
        Arc::clone(&platform),
        config.moderation.clone(),
    ));

    // ── Startup Recovery: re-arm unmute timers for persisted mutes ──────
    match moderator.recover(Utc::now()).await {
        Ok(report) if report.rescheduled + report.expired > 0 => {
            eprintln!(
                "   Recovered {} pending mutes, lifted {} expired",
                report.rescheduled, report.expired
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Mute recovery failed: {}", e),
    }

    let commands = CommandHandler::new(Arc::clone(&moderator), config.admins.clone());
    let bot = Arc::new(Bot::new(platform, moderator, commands));
    bot.run().await?;

    Ok(())
}
