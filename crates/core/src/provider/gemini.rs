//! Google Gemini backend adapter over the REST `generateContent` API.

use super::{ProviderAdapter, ProviderId, StreamChunk};
use crate::types::{Message, MessageRole};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

// --- Local Gemini wire types (for encapsulation) ---
mod gemini_types {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerateContentRequest {
        pub contents: Vec<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<SystemInstruction>,
    }

    #[derive(Serialize)]
    pub(super) struct SystemInstruction {
        pub parts: Vec<Part>,
    }

    #[derive(Serialize)]
    pub(super) struct Content {
        pub role: String,
        pub parts: Vec<Part>,
    }

    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct GenerateContentResponse {
        pub candidates: Vec<Candidate>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Candidate {
        pub content: CandidateContent,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct CandidateContent {
        pub parts: Vec<CandidatePart>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct CandidatePart {
        pub text: Option<String>,
    }
}

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the Gemini REST API. Text generation only; this backend is
/// not offered for image-bearing requests.
pub struct GeminiAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    fn build_request(messages: &[Message]) -> gemini_types::GenerateContentRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                MessageRole::System => system_parts.push(gemini_types::Part {
                    text: msg.content.clone(),
                }),
                MessageRole::User => contents.push(gemini_types::Content {
                    role: "user".to_string(),
                    parts: vec![gemini_types::Part {
                        text: msg.content.clone(),
                    }],
                }),
                MessageRole::Assistant => contents.push(gemini_types::Content {
                    role: "model".to_string(),
                    parts: vec![gemini_types::Part {
                        text: msg.content.clone(),
                    }],
                }),
            }
        }

        gemini_types::GenerateContentRequest {
            contents,
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(gemini_types::SystemInstruction {
                    parts: system_parts,
                })
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn supports_images(&self) -> bool {
        false
    }

    async fn initialize(&self) -> Result<()> {
        info!(model = %self.model, "Gemini adapter ready");
        Ok(())
    }

    async fn generate_text(&self, messages: &[Message]) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );
        let request = Self::build_request(messages);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<gemini_types::GenerateContentResponse>()
            .await?;

        let candidate = response
            .candidates
            .first()
            .context("No candidate in Gemini response")?;
        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(anyhow!("Gemini response had no text content"));
        }
        Ok(text)
    }

    async fn stream_response(
        &self,
        messages: &[Message],
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        // The REST endpoint returns the whole turn at once; it is delivered
        // to the reconciler as a single completed chunk.
        let text = self.generate_text(messages).await?;
        if chunks.send(StreamChunk::completed(text)).await.is_err() {
            debug!("Chunk consumer closed before Gemini response was delivered");
        }
        Ok(())
    }

    async fn send_tool_result(&self, payload: Value) -> Result<()> {
        debug!(%payload, "Buffering tool result for next Gemini request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_maps_roles() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("what is light?"),
            Message::assistant("electromagnetic radiation"),
            Message::user("go on"),
        ];
        let request = GeminiAdapter::build_request(&messages);

        assert!(request.system_instruction.is_some());
        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[0].role, "user");
        assert_eq!(request.contents[1].role, "model");
        assert_eq!(request.contents[2].role, "user");
    }

    #[test]
    fn test_build_request_without_system_prompt() {
        let request = GeminiAdapter::build_request(&[Message::user("hi")]);
        assert!(request.system_instruction.is_none());
        assert_eq!(request.contents.len(), 1);
    }
}
