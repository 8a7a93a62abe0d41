use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use crate::error::{Error, Result};

// Constants for validation
const MAX_BODY_CHARS: usize = 100_000;

/// Opaque message identifier assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(Arc<str>);

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(|s| Self(s.into()))
    }
}

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who wrote a stored message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

/// Role on the completion provider wire format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl From<Author> for Role {
    fn from(author: Author) -> Self {
        match author {
            Author::User => Role::User,
            Author::Assistant => Role::Assistant,
        }
    }
}

/// Token usage statistics reported by the provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A stored chat message.
///
/// `body` is `None` only for an assistant placeholder whose reply has not
/// arrived yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub author: Author,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
    pub created_at: i64,
    /// Insertion sequence; the canonical creation order
    pub seq: u64,
}

impl Message {
    /// True for an assistant placeholder still waiting on its reply
    pub fn is_pending(&self) -> bool {
        self.author == Author::Assistant && self.body.is_none()
    }
}

/// Fields for a message that does not exist yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub author: Author,
    pub body: Option<String>,
}

impl NewMessage {
    pub fn user(body: impl Into<String>) -> Self {
        Self { author: Author::User, body: Some(body.into()) }
    }

    pub fn placeholder() -> Self {
        Self { author: Author::Assistant, body: None }
    }

    /// Only an assistant message may be stored without a body
    pub fn validate(&self) -> Result<()> {
        if self.body.is_none() && self.author != Author::Assistant {
            return Err(Error::ValidationFailed(
                "Only assistant messages may be created without a body".into(),
            ));
        }
        Ok(())
    }
}

/// Partial update applied onto an existing message. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub body: Option<String>,
    pub usage: Option<Usage>,
    pub updated_at: Option<i64>,
    pub processing_ms: Option<u64>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        self.body.is_none()
            && self.usage.is_none()
            && self.updated_at.is_none()
            && self.processing_ms.is_none()
    }

    pub fn apply(&self, message: &mut Message) {
        if let Some(body) = &self.body {
            message.body = Some(body.clone());
        }
        if let Some(usage) = self.usage {
            message.usage = Some(usage);
        }
        if let Some(updated_at) = self.updated_at {
            message.updated_at = Some(updated_at);
        }
        if let Some(processing_ms) = self.processing_ms {
            message.processing_ms = Some(processing_ms);
        }
    }
}

/// Validate the text of a new user message
pub fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(Error::BadRequest("Message body cannot be empty".into()));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(Error::BadRequest("Message body too long (max 100k chars)".into()));
    }
    Ok(())
}

/// Chat message with role and content, as sent to the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Request for a chat completion
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// What the relay keeps from a successful completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
    pub processing_ms: Option<u64>,
}

/// Body of `POST /messages`
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub provider_configured: bool,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health status enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Current wall-clock time in unix milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
