//! Chat platform abstraction: inbound events and member restriction.
//!
//! Outgoing text is Telegram-style HTML; use [`escape_html`] for anything
//! user-supplied and [`mention`] to link a member.

pub mod telegram;

pub use telegram::TelegramPlatform;

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::PlatformError;
use crate::moderation::model::ChatUserKey;

/// Kind of chat, as far as moderation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Parse the platform's chat type string. Unknown types count as groups.
    pub fn from_api(kind: &str) -> Self {
        match kind {
            "private" => Self::Private,
            "supergroup" => Self::Supergroup,
            "channel" => Self::Channel,
            _ => Self::Group,
        }
    }

    /// Only supergroups allow per-member send restrictions.
    pub fn supports_restriction(self) -> bool {
        matches!(self, Self::Supergroup)
    }

    pub fn is_group(self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }
}

/// A text message posted in a chat.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn key(&self) -> ChatUserKey {
        ChatUserKey::new(self.chat_id, self.user_id)
    }

    /// `@username` when there is one, otherwise the display name.
    pub fn author_label(&self) -> String {
        match &self.username {
            Some(u) => format!("@{u}"),
            None => self.display_name.clone(),
        }
    }
}

/// Anything the bot reacts to.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(IncomingMessage),
    MemberJoined {
        key: ChatUserKey,
        joined_at: DateTime<Utc>,
    },
}

/// Stream of inbound events from a platform.
pub type EventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Operations the bot needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn name(&self) -> &str;

    /// Start receiving events.
    async fn start(&self) -> Result<EventStream, PlatformError>;

    async fn chat_kind(&self, chat_id: i64) -> Result<ChatKind, PlatformError>;

    /// Allow or forbid a member to send messages, optionally until a time.
    async fn restrict(
        &self,
        chat_id: i64,
        user_id: i64,
        allow_send: bool,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), PlatformError>;

    async fn member_display_name(&self, chat_id: i64, user_id: i64)
    -> Result<String, PlatformError>;
}

/// Escape text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Link to a member by id.
pub fn mention(user_id: i64, label: &str) -> String {
    format!(
        "<a href=\"tg://user?id={user_id}\">{}</a>",
        escape_html(label)
    )
}
