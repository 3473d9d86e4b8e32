//! Data models for the practice session API and its event stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::client::ClientError;

/// Maximum length, in characters, of an issue or chat message.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Kind tag of a decoded stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// One incremental fragment of generated text.
    Token,
    /// The server finished the reply.
    Done,
    /// The server failed mid-stream.
    Error,
    /// Frame carried no `event:` line.
    Message,
    /// Any tag this client does not know about.
    Other(String),
}

impl EventKind {
    /// The tag as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Token => "token",
            EventKind::Done => "done",
            EventKind::Error => "error",
            EventKind::Message => "message",
            EventKind::Other(tag) => tag,
        }
    }
}

impl From<&str> for EventKind {
    fn from(tag: &str) -> Self {
        match tag {
            "token" => EventKind::Token,
            "done" => EventKind::Done,
            "error" => EventKind::Error,
            "message" => EventKind::Message,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed event decoded from one SSE frame.
///
/// The payload is always a JSON object. Data that is not a JSON object is kept
/// verbatim under the `raw` key.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub payload: Map<String, Value>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, payload: Map<String, Value>) -> Self {
        Self { kind, payload }
    }

    /// The `content` field of a `token` event.
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(Value::as_str)
    }

    /// The `detail` field of an `error` event.
    pub fn detail(&self) -> Option<&str> {
        self.payload.get("detail").and_then(Value::as_str)
    }

    /// Index of the stored message, sent by the server on `done`.
    pub fn message_index(&self) -> Option<u64> {
        self.payload.get("message_index").and_then(Value::as_u64)
    }

    /// Undecodable data text, if the payload fell back to `{raw}`.
    pub fn raw(&self) -> Option<&str> {
        self.payload.get("raw").and_then(Value::as_str)
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

/// A message as shown in a stage's conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }
}

impl From<StoredMessage> for ChatMessage {
    fn from(message: StoredMessage) -> Self {
        Self {
            role: message.role,
            content: message.content,
        }
    }
}

/// Stage of a practice session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStage {
    /// Waiting for the user's issue.
    #[default]
    Input,
    /// The AI comforts the user.
    Conversation,
    /// The user comforts the AI.
    RoleSwap,
    /// Annotated review of the role swap.
    Review,
    /// Ended by the server, e.g. after a moderation hit.
    Terminated,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::Input => "input",
            SessionStage::Conversation => "conversation",
            SessionStage::RoleSwap => "roleSwap",
            SessionStage::Review => "review",
            SessionStage::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Response of `POST /api/sessions/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCreated {
    pub id: String,
    pub stage: SessionStage,
}

/// A message as persisted by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A mood score given after one of the AI's stage 2 replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoodRating {
    pub value: u8,
    pub after_message_index: i64,
}

/// Review note attached to one stage 3 message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub message_index: usize,
    pub content: String,
}

/// Full server-side view of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: String,
    pub stage: SessionStage,
    #[serde(default)]
    pub user_issue: Option<String>,
    #[serde(default)]
    pub stage2_messages: Vec<StoredMessage>,
    #[serde(default)]
    pub stage3_messages: Vec<StoredMessage>,
    #[serde(default)]
    pub mood_ratings: Vec<MoodRating>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Body of the issue and chat endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContentRequest {
    pub content: String,
}

impl ContentRequest {
    /// Validate user text: non-blank and at most [`MAX_CONTENT_CHARS`] characters.
    pub fn new(content: &str) -> Result<Self, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("message must not be empty".to_string()));
        }
        let chars = content.chars().count();
        if chars > MAX_CONTENT_CHARS {
            return Err(ClientError::Validation(format!(
                "message is {} characters, limit is {}",
                chars, MAX_CONTENT_CHARS
            )));
        }
        Ok(Self {
            content: content.to_string(),
        })
    }
}

/// Body of the mood endpoint.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MoodRequest {
    pub value: u8,
}

impl MoodRequest {
    /// Validate a mood score in `0..=100`.
    pub fn new(value: u8) -> Result<Self, ClientError> {
        if value > 100 {
            return Err(ClientError::Validation(format!(
                "mood must be between 0 and 100, got {}",
                value
            )));
        }
        Ok(Self { value })
    }
}
