//! Command execution and reply formatting.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::commands::{Command, CommandUsage};
use crate::config::AdminList;
use crate::moderation::{ChatUserKey, Moderator};
use crate::platform::{IncomingMessage, mention};

const HELP_TEXT: &str = "\
🛡 <b>AntiToxicBot</b>
Messages are scored for toxicity. Repeat offenders are muted, and each \
further round of offenses makes the mute longer.

/muted_users — who is muted right now
/leaderboard — most toxic members (alias /toxic_top)
/history [page] — past mutes
/unmute &lt;user_id&gt; — lift a mute (admins only)";

pub struct CommandHandler {
    moderator: Arc<Moderator>,
    admins: AdminList,
}

impl CommandHandler {
    pub fn new(moderator: Arc<Moderator>, admins: AdminList) -> Self {
        Self { moderator, admins }
    }

    /// Run a command and return the HTML reply, if any.
    pub async fn handle(&self, msg: &IncomingMessage, command: Command) -> Option<String> {
        match command {
            Command::Start => Some(
                "👋 Hi! I'm AntiToxicBot and I keep an eye on toxicity here. Keep it civil!"
                    .to_string(),
            ),
            Command::Help => Some(HELP_TEXT.to_string()),
            Command::MutedUsers => Some(self.muted_users(msg.chat_id).await),
            Command::Leaderboard => Some(self.leaderboard(msg.chat_id).await),
            Command::History { page } => Some(self.history(msg.chat_id, page).await),
            Command::Invalid(CommandUsage::History) => {
                Some("❌ Page must be a number, e.g. /history 2".to_string())
            }
            Command::Unmute { user_id } => self.unmute(msg, Some(user_id)).await,
            Command::Invalid(CommandUsage::Unmute) => self.unmute(msg, None).await,
            Command::Unknown(_) => None,
        }
    }

    fn is_admin(&self, msg: &IncomingMessage) -> bool {
        self.admins.is_admin(msg.user_id, msg.username.as_deref())
    }

    /// Authorization comes first, so non-admins learn nothing about usage.
    async fn unmute(&self, msg: &IncomingMessage, target: Option<i64>) -> Option<String> {
        if !msg.chat_kind.is_group() {
            return Some("ℹ️ /unmute only works in group chats.".to_string());
        }
        if !self.is_admin(msg) {
            info!(chat_id = msg.chat_id, user_id = msg.user_id, "Unauthorized unmute attempt");
            return Some("⛔ You are not allowed to use this command.".to_string());
        }

        let Some(user_id) = target else {
            return Some("❌ Please give a valid user id to unmute: /unmute &lt;user_id&gt;".to_string());
        };

        let key = ChatUserKey::new(msg.chat_id, user_id);
        match self.moderator.manual_unmute(key, msg.user_id).await {
            // The scheduler already announced it
            Ok(outcome) if outcome.notified => None,
            Ok(_) => Some(format!("✅ {} unmuted.", mention(user_id, &user_id.to_string()))),
            Err(e) => {
                error!(%key, error = %e, "Manual unmute failed");
                Some("⚠️ Could not unmute right now, please try again.".to_string())
            }
        }
    }

    async fn muted_users(&self, chat_id: i64) -> String {
        let mutes = match self.moderator.reporting().active_mutes(chat_id).await {
            Ok(mutes) => mutes,
            Err(e) => {
                error!(chat_id, error = %e, "Listing mutes failed");
                return storage_failure();
            }
        };
        if mutes.is_empty() {
            return "✅ Nobody is muted right now.".to_string();
        }

        let mut out = String::from("🚫 Muted users:\n\n");
        for mute in mutes {
            let _ = writeln!(
                out,
                "- {} until {}",
                mention(mute.record.key.user_id, &mute.display_name),
                format_time(mute.record.until)
            );
        }
        out
    }

    async fn leaderboard(&self, chat_id: i64) -> String {
        let entries = match self.moderator.reporting().leaderboard(chat_id).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(chat_id, error = %e, "Leaderboard query failed");
                return storage_failure();
            }
        };
        if entries.is_empty() {
            return "Nothing has been scored in this chat yet.".to_string();
        }

        let mut out = String::from("☣️ Most toxic members:\n\n");
        for (rank, entry) in entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. {} — {:.2} avg over {} messages",
                rank + 1,
                mention(entry.user_id, &entry.user_id.to_string()),
                entry.average_score,
                entry.samples
            );
        }
        out
    }

    async fn history(&self, chat_id: i64, page: usize) -> String {
        let history = match self.moderator.reporting().history(chat_id, page).await {
            Ok(history) => history,
            Err(e) => {
                error!(chat_id, error = %e, "History query failed");
                return storage_failure();
            }
        };
        if history.total == 0 {
            return "No mutes recorded in this chat yet.".to_string();
        }
        if history.entries.is_empty() {
            return format!(
                "No mute history on page {}. There are {} pages.",
                history.page, history.page_count
            );
        }

        let mut out = format!(
            "📜 Mute history, page {}/{}:\n\n",
            history.page, history.page_count
        );
        for event in history.entries {
            let _ = writeln!(
                out,
                "- {} until {} (offense #{}, score {:.2})",
                mention(event.key.user_id, &event.key.user_id.to_string()),
                format_time(event.until),
                event.offense_count,
                event.score
            );
        }
        out
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn storage_failure() -> String {
    "⚠️ Could not read moderation data right now.".to_string()
}
