//! Core data model shared across the orchestration pipeline.
//!
//! Everything here is a plain value type: messages sent to a language
//! provider, persisted conversation turns and sessions, the uniform tool
//! result shape, and the lifecycle events pushed to UI bridges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Role of a message within an LLM conversation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn sent to a language provider. Immutable once created; ordering
/// within a conversation is significant.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Raw image bytes for multimodal requests. Providers that cannot
    /// consume images are skipped during selection when this is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<Vec<u8>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            image_data: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            image_data: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            image_data: None,
        }
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image_data = Some(bytes);
        self
    }
}

/// Role of a persisted conversation turn.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Bot,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Bot => write!(f, "bot"),
        }
    }
}

/// Unit of persisted history. Created by the orchestrator once a tool
/// completes and never mutated afterwards.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Names of the tools that contributed to this turn.
    pub related_tools: Vec<String>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>, related_tools: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            related_tools,
        }
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Bounds a logical interaction window. Owned exclusively by the memory
/// system.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub kind: String,
    pub status: SessionStatus,
}

impl Session {
    pub fn start(kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            kind: kind.into(),
            status: SessionStatus::Active,
        }
    }

    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
        self.status = SessionStatus::Ended;
    }
}

/// Outcome of exactly one tool invocation. `success == false` implies
/// `result` is absent.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn ok(result: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms,
        }
    }

    pub fn fail(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }
}

/// Normalized tool output, resolved once at the orchestrator boundary.
///
/// Tools return heterogeneous JSON shapes (a bare string, `{"message": …}`,
/// `{"response": …}`, `{"result": …}`); this union is the single place that
/// understands all of them.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResponse {
    Text(String),
    Structured { message: String, metadata: Value },
}

impl ToolResponse {
    /// Normalizes a raw tool result value. Returns `None` when no usable
    /// text can be extracted.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(ToolResponse::Text(s.clone())),
            Value::Object(map) => {
                if let Some(Value::String(message)) = map.get("message") {
                    return Some(ToolResponse::Structured {
                        message: message.clone(),
                        metadata: value.clone(),
                    });
                }
                if let Some(Value::String(response)) = map.get("response") {
                    return Some(ToolResponse::Text(response.clone()));
                }
                if let Some(inner) = map.get("result") {
                    return ToolResponse::from_value(inner);
                }
                None
            }
            _ => None,
        }
    }

    /// The display/persistence text for this response.
    pub fn into_text(self) -> String {
        match self {
            ToolResponse::Text(text) => text,
            ToolResponse::Structured { message, .. } => message,
        }
    }
}

/// Lifecycle events fired by the orchestrator for UI bridge collaborators.
/// Each fires at most once per logical query.
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A query was accepted and is now processing.
    QueryReceived { query_id: Uuid, query: String },
    /// A query finished and its turn pair was persisted.
    QueryProcessed {
        query_id: Uuid,
        query: String,
        response: String,
        tool: String,
    },
    /// A streamed voice response was reconciled into its final text.
    VoiceCompleted {
        query_id: Uuid,
        query: String,
        text: String,
    },
    /// A query failed; the user received an apology string instead.
    SystemError { message: String },
    /// Memory and provider sessions were reset.
    SystemReset,
}
