//! Bot event loop.
//!
//! Pulls events off the platform stream and handles each in its own task:
//! joins are recorded, this bot's commands go to the command handler, and
//! every other group message, including other bots' commands, is evaluated
//! by the moderator.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::commands::{Command, CommandHandler, CommandParser};
use crate::error::PlatformError;
use crate::moderation::{Decision, Moderator};
use crate::platform::{ChatEvent, ChatPlatform, IncomingMessage};

pub struct Bot {
    platform: Arc<dyn ChatPlatform>,
    moderator: Arc<Moderator>,
    commands: CommandHandler,
}

impl Bot {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        moderator: Arc<Moderator>,
        commands: CommandHandler,
    ) -> Self {
        Self {
            platform,
            moderator,
            commands,
        }
    }

    /// Run until Ctrl+C or until the platform stream ends.
    pub async fn run(self: Arc<Self>) -> Result<(), PlatformError> {
        let mut events = self.platform.start().await?;
        info!(platform = self.platform.name(), "Bot started");

        loop {
            let event = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down...");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => event,
                    None => {
                        info!("Event stream ended, shutting down...");
                        break;
                    }
                }
            };

            let bot = Arc::clone(&self);
            tokio::spawn(async move {
                bot.handle_event(event).await;
            });
        }

        self.moderator.shutdown().await;
        Ok(())
    }

    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::MemberJoined { key, joined_at } => {
                if let Err(e) = self.moderator.record_join(key, joined_at).await {
                    error!(%key, error = %e, "Failed to record join");
                }
            }
            ChatEvent::Message(msg) => match CommandParser::parse(&msg.text) {
                // Not ours; the text is still moderated
                Some(Command::Unknown(_)) | None => self.moderate(&msg).await,
                Some(command) => {
                    debug!(chat_id = msg.chat_id, user_id = msg.user_id, ?command, "Command received");
                    if let Some(reply) = self.commands.handle(&msg, command).await {
                        self.reply(&msg, &reply).await;
                    }
                }
            },
        }
    }

    async fn moderate(&self, msg: &IncomingMessage) {
        if !msg.chat_kind.is_group() {
            return;
        }

        let key = msg.key();
        match self.moderator.evaluate(msg, Utc::now()).await {
            Ok(Decision::Muted {
                until, offenses, ..
            }) => {
                debug!(%key, %until, offenses, "Mute decision applied");
            }
            Ok(decision) => debug!(%key, ?decision, "Message evaluated"),
            Err(e) => error!(%key, error = %e, "Moderation failed"),
        }
    }

    async fn reply(&self, msg: &IncomingMessage, text: &str) {
        if let Err(e) = self.platform.send_message(msg.chat_id, text).await {
            warn!(chat_id = msg.chat_id, error = %e, "Failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::config::{AdminList, ModerationConfig};
    use crate::moderation::ChatUserKey;
    use crate::platform::ChatKind;
    use crate::store::Database;
    use crate::testing::{RecordingPlatform, StubClassifier, memory_store, message};

    async fn bot(
        scores: &[f64],
    ) -> (Bot, Arc<dyn Database>, Arc<RecordingPlatform>) {
        let store = memory_store().await;
        let platform = Arc::new(RecordingPlatform::default());
        let moderator = Arc::new(Moderator::new(
            Arc::clone(&store),
            Arc::new(StubClassifier::with_scores(scores)),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            ModerationConfig::default(),
        ));
        let commands = CommandHandler::new(Arc::clone(&moderator), AdminList::default());
        let bot = Bot::new(
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            moderator,
            commands,
        );
        (bot, store, platform)
    }

    #[tokio::test]
    async fn join_events_are_recorded_once() {
        let (bot, store, _) = bot(&[]).await;
        let key = ChatUserKey::new(-100, 3);
        let first = Utc::now() - TimeDelta::hours(1);

        bot.handle_event(ChatEvent::MemberJoined {
            key,
            joined_at: first,
        })
        .await;
        bot.handle_event(ChatEvent::MemberJoined {
            key,
            joined_at: Utc::now(),
        })
        .await;

        let join = store.get_join(key).await.unwrap().unwrap();
        assert_eq!(join.join_date.timestamp(), first.timestamp());
    }

    #[tokio::test]
    async fn group_messages_are_scored() {
        let (bot, store, _) = bot(&[0.3]).await;
        let msg = message(-100, 4, "hi all");

        bot.handle_event(ChatEvent::Message(msg.clone())).await;

        assert_eq!(store.count_scores_above(msg.key(), 0.0, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn private_messages_are_not_scored() {
        let (bot, store, _) = bot(&[0.99]).await;
        let mut msg = message(4, 4, "hi bot");
        msg.chat_kind = ChatKind::Private;

        bot.handle_event(ChatEvent::Message(msg.clone())).await;

        assert_eq!(store.count_scores_above(msg.key(), -1.0, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn slash_prefixed_text_is_still_moderated() {
        let texts = ["/ты идиот", "/ you are an idiot", "/weather@OtherBot idiot"];
        let (bot, store, platform) = bot(&[0.99; 3]).await;

        for (i, text) in texts.iter().enumerate() {
            let msg = message(-100, 10 + i as i64, text);
            bot.handle_event(ChatEvent::Message(msg.clone())).await;
            assert_eq!(
                store.count_scores_above(msg.key(), 0.9, None).await.unwrap(),
                1,
                "{text} was not scored"
            );
        }
        assert!(platform.sent().is_empty());
    }

    #[tokio::test]
    async fn commands_reply_and_skip_scoring() {
        let (bot, store, platform) = bot(&[0.99]).await;
        let msg = message(-100, 4, "/start");

        bot.handle_event(ChatEvent::Message(msg.clone())).await;

        assert_eq!(platform.sent().len(), 1);
        assert_eq!(store.count_scores_above(msg.key(), -1.0, None).await.unwrap(), 0);
    }
}
