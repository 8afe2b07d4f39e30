//! Shared fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::classifier::{CategoryScores, ToxicityClassifier};
use crate::error::{ClassifierError, PlatformError};
use crate::platform::{ChatKind, ChatPlatform, EventStream, IncomingMessage};
use crate::store::{Database, LibSqlBackend};

pub async fn memory_store() -> Arc<dyn Database> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

/// Returns queued scores in order; an empty queue is a quota failure.
#[derive(Default)]
pub struct StubClassifier {
    queue: Mutex<VecDeque<f64>>,
}

impl StubClassifier {
    pub fn with_scores(scores: &[f64]) -> Self {
        Self {
            queue: Mutex::new(scores.iter().copied().collect()),
        }
    }

    pub fn push(&self, score: f64) {
        self.queue.lock().unwrap().push_back(score);
    }
}

#[async_trait]
impl ToxicityClassifier for StubClassifier {
    fn name(&self) -> &str {
        "stub"
    }

    async fn score(&self, _text: &str) -> Result<CategoryScores, ClassifierError> {
        match self.queue.lock().unwrap().pop_front() {
            Some(score) => Ok(CategoryScores {
                toxicity: score,
                ..Default::default()
            }),
            None => Err(ClassifierError::QuotaExceeded {
                provider: "stub".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Restrict {
        chat_id: i64,
        user_id: i64,
        allow_send: bool,
        until: Option<DateTime<Utc>>,
    },
    Delete {
        chat_id: i64,
        message_id: i64,
    },
    Send {
        chat_id: i64,
        text: String,
    },
}

/// Records every outbound call. Chats default to supergroups.
#[derive(Default)]
pub struct RecordingPlatform {
    pub calls: Mutex<Vec<Call>>,
    pub kinds: Mutex<HashMap<i64, ChatKind>>,
    pub names: Mutex<HashMap<i64, String>>,
    pub fail_restrict: Mutex<bool>,
}

impl RecordingPlatform {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn set_kind(&self, chat_id: i64, kind: ChatKind) {
        self.kinds.lock().unwrap().insert(chat_id, kind);
    }

    pub fn set_name(&self, user_id: i64, name: &str) {
        self.names.lock().unwrap().insert(user_id, name.to_string());
    }

    pub fn fail_restrictions(&self) {
        *self.fail_restrict.lock().unwrap() = true;
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<EventStream, PlatformError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn chat_kind(&self, chat_id: i64) -> Result<ChatKind, PlatformError> {
        Ok(self
            .kinds
            .lock()
            .unwrap()
            .get(&chat_id)
            .copied()
            .unwrap_or(ChatKind::Supergroup))
    }

    async fn restrict(
        &self,
        chat_id: i64,
        user_id: i64,
        allow_send: bool,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError> {
        if *self.fail_restrict.lock().unwrap() {
            return Err(PlatformError::CallFailed {
                name: "recording".into(),
                method: "restrictChatMember".into(),
                reason: "not enough rights".into(),
            });
        }
        self.calls.lock().unwrap().push(Call::Restrict {
            chat_id,
            user_id,
            allow_send,
            until,
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
        self.calls.lock().unwrap().push(Call::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), PlatformError> {
        self.calls.lock().unwrap().push(Call::Send {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn member_display_name(
        &self,
        _chat_id: i64,
        user_id: i64,
    ) -> Result<String, PlatformError> {
        self.names
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PlatformError::CallFailed {
                name: "recording".into(),
                method: "getChatMember".into(),
                reason: "user not found".into(),
            })
    }
}

pub fn message(chat_id: i64, user_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id,
        chat_kind: ChatKind::Supergroup,
        message_id: 100,
        user_id,
        username: Some(format!("user{user_id}")),
        display_name: format!("User {user_id}"),
        text: text.to_string(),
        received_at: Utc::now(),
    }
}
