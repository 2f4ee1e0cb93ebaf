//! Request and response bodies for the REST API.

use chrono::{DateTime, Utc};
use sage_core::ConversationTurn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize, Debug)]
pub struct QueryPayload {
    pub query: String,
    /// Answer over the voice path when the agent supports it.
    #[serde(default)]
    pub voice: bool,
}

#[derive(Serialize, Debug)]
pub struct QueryResponse {
    pub response: String,
}

#[derive(Serialize, Debug)]
pub struct HistoryResponse {
    pub turns: Vec<ConversationTurn>,
    pub session: Option<SessionInfo>,
}

#[derive(Serialize, Debug)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub kind: String,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
    pub busy: bool,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_payload_voice_defaults_off() {
        let payload: QueryPayload = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        assert_eq!(payload.query, "hi");
        assert!(!payload.voice);

        let spoken: QueryPayload =
            serde_json::from_str(r#"{"query": "hi", "voice": true}"#).unwrap();
        assert!(spoken.voice);
    }
}
