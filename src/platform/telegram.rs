//! Telegram platform, long-polling the Bot API for updates.
//!
//! Native Rust Telegram Bot API implementation of `ChatPlatform`:
//! inbound messages and member joins, restriction, deletion, notices.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PlatformError;
use crate::moderation::model::ChatUserKey;
use crate::platform::{ChatEvent, ChatKind, ChatPlatform, EventStream, IncomingMessage};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll when Telegram gives no `retry_after`.
const POLL_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// A getUpdates reply that carried no updates.
#[derive(Debug, Clone, PartialEq)]
struct PollFailure {
    description: String,
    retry_after: std::time::Duration,
}

/// Extract the update list from a getUpdates reply.
fn poll_result(data: &serde_json::Value) -> Result<&Vec<serde_json::Value>, PollFailure> {
    let ok = data.get("ok").and_then(serde_json::Value::as_bool) == Some(true);
    if ok {
        if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
            return Ok(results);
        }
    }

    let description = data
        .get("description")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("no result in getUpdates reply")
        .to_string();
    let retry_after = data
        .pointer("/parameters/retry_after")
        .and_then(serde_json::Value::as_u64)
        .map_or(POLL_RETRY_DELAY, std::time::Duration::from_secs);

    Err(PollFailure {
        description,
        retry_after,
    })
}

/// Connects to the Bot API via long-polling.
pub struct TelegramPlatform {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramPlatform {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Call a Bot API method and return its `result` payload.
    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, PlatformError> {
        let failed = |reason: String| PlatformError::CallFailed {
            name: "telegram".into(),
            method: method.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Http(e.to_string()))?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| failed(format!("HTTP {status}, unreadable body: {e}")))?;

        if data.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("no description");
            return Err(failed(format!("HTTP {status}: {description}")));
        }

        Ok(data.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Send a single message chunk (≤4096 chars), HTML-first with fallback.
    async fn send_message_chunk(&self, chat_id: i64, text: &str) -> Result<(), PlatformError> {
        let html = self
            .call(
                "sendMessage",
                serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            )
            .await;

        let Err(html_err) = html else {
            return Ok(());
        };

        tracing::warn!(
            chat_id,
            error = %html_err,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        self.call(
            "sendMessage",
            serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }),
        )
        .await
        .map(|_| ())
    }
}

// ── ChatPlatform implementation ─────────────────────────────────────

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, PlatformError> {
        self.client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| PlatformError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
            .and_then(|resp| {
                if resp.status().is_success() {
                    Ok(())
                } else {
                    Err(PlatformError::StartupFailed {
                        name: "telegram".into(),
                        reason: format!("getMe returned {}", resp.status()),
                    })
                }
            })?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram platform listening for updates...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "chat_member"]
                });

                let resp = match client
                    .post(api_url(&bot_token, "getUpdates"))
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let results = match poll_result(&data) {
                    Ok(results) => results,
                    Err(failure) => {
                        tracing::warn!(
                            retry_after = ?failure.retry_after,
                            "Telegram getUpdates failed: {}",
                            failure.description
                        );
                        tokio::time::sleep(failure.retry_after).await;
                        continue;
                    }
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    for event in parse_update(update) {
                        if tx.send(event).is_err() {
                            tracing::info!("Telegram listener channel closed");
                            return;
                        }
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn chat_kind(&self, chat_id: i64) -> Result<ChatKind, PlatformError> {
        let chat = self
            .call("getChat", serde_json::json!({ "chat_id": chat_id }))
            .await?;
        Ok(chat
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(ChatKind::from_api)
            .unwrap_or(ChatKind::Group))
    }

    async fn restrict(
        &self,
        chat_id: i64,
        user_id: i64,
        allow_send: bool,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "user_id": user_id,
            "permissions": { "can_send_messages": allow_send },
        });
        if let Some(until) = until {
            body["until_date"] = serde_json::json!(until.timestamp());
        }
        self.call("restrictChatMember", body).await.map(|_| ())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
        self.call(
            "deleteMessage",
            serde_json::json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
        .map(|_| ())
    }

    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), PlatformError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn member_display_name(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<String, PlatformError> {
        let member = self
            .call(
                "getChatMember",
                serde_json::json!({ "chat_id": chat_id, "user_id": user_id }),
            )
            .await?;
        Ok(member
            .get("user")
            .map(display_name)
            .unwrap_or_else(|| user_id.to_string()))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(bot_token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{bot_token}/{method}")
}

/// `@username`, else "first last", else the numeric id.
fn display_name(user: &serde_json::Value) -> String {
    if let Some(username) = user.get("username").and_then(serde_json::Value::as_str) {
        return format!("@{username}");
    }
    let name = ["first_name", "last_name"]
        .iter()
        .filter_map(|f| user.get(*f).and_then(serde_json::Value::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        user.get("id")
            .and_then(serde_json::Value::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".into())
    } else {
        name
    }
}

fn unix_to_utc(value: Option<&serde_json::Value>) -> DateTime<Utc> {
    value
        .and_then(serde_json::Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

/// Translate one Bot API update into zero or more events.
fn parse_update(update: &serde_json::Value) -> Vec<ChatEvent> {
    let mut events = Vec::new();

    if let Some(message) = update.get("message") {
        let Some(chat_id) = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64)
        else {
            return events;
        };
        let date = unix_to_utc(message.get("date"));

        if let Some(members) = message
            .get("new_chat_members")
            .and_then(serde_json::Value::as_array)
        {
            for member in members {
                if let Some(user_id) = member.get("id").and_then(serde_json::Value::as_i64) {
                    events.push(ChatEvent::MemberJoined {
                        key: ChatUserKey::new(chat_id, user_id),
                        joined_at: date,
                    });
                }
            }
        }

        let from = message.get("from");
        let is_bot = from
            .and_then(|f| f.get("is_bot"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let user_id = from
            .and_then(|f| f.get("id"))
            .and_then(serde_json::Value::as_i64);

        if let (Some(text), Some(user_id), false) = (
            message.get("text").and_then(serde_json::Value::as_str),
            user_id,
            is_bot,
        ) {
            let chat_kind = message
                .get("chat")
                .and_then(|c| c.get("type"))
                .and_then(serde_json::Value::as_str)
                .map(ChatKind::from_api)
                .unwrap_or(ChatKind::Group);

            events.push(ChatEvent::Message(IncomingMessage {
                chat_id,
                chat_kind,
                message_id: message
                    .get("message_id")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or_default(),
                user_id,
                username: from
                    .and_then(|f| f.get("username"))
                    .and_then(serde_json::Value::as_str)
                    .map(String::from),
                display_name: from.map(display_name).unwrap_or_default(),
                text: text.to_string(),
                received_at: date,
            }));
        }
    }

    if let Some(change) = update.get("chat_member") {
        let status = |field: &str| {
            change
                .get(field)
                .and_then(|m| m.get("status"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let was_out = matches!(status("old_chat_member").as_str(), "left" | "kicked");
        let is_in = matches!(
            status("new_chat_member").as_str(),
            "member" | "restricted" | "administrator"
        );

        let chat_id = change
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64);
        let user_id = change
            .get("new_chat_member")
            .and_then(|m| m.get("user"))
            .and_then(|u| u.get("id"))
            .and_then(serde_json::Value::as_i64);

        if let (true, true, Some(chat_id), Some(user_id)) = (was_out, is_in, chat_id, user_id) {
            events.push(ChatEvent::MemberJoined {
                key: ChatUserKey::new(chat_id, user_id),
                joined_at: unix_to_utc(change.get("date")),
            });
        }
    }

    events
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
