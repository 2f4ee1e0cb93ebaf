//! OpenAI backend adapter over the chat completions API.

use super::{ProviderAdapter, ProviderId, StreamChunk};
use crate::types::{Message, MessageRole};
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Adapter for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn convert_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut converted = Vec::with_capacity(messages.len());
        for msg in messages {
            let request_msg: ChatCompletionRequestMessage = match msg.role {
                MessageRole::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            };
            converted.push(request_msg);
        }
        Ok(converted)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn supports_images(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<()> {
        // The chat completions API is sessionless; the handshake is a no-op
        // and real failures surface on the first request.
        info!(model = %self.model, "OpenAI adapter ready");
        Ok(())
    }

    async fn generate_text(&self, messages: &[Message]) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::convert_messages(messages)?)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .context("No response choice from OpenAI")?
            .message
            .content
            .clone()
            .ok_or_else(|| anyhow!("OpenAI response had no text content"))?;
        Ok(content)
    }

    async fn stream_response(
        &self,
        messages: &[Message],
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::convert_messages(messages)?)
            .stream(true)
            .build()?;

        let mut stream = self.client.chat().create_stream(request).await?;
        while let Some(result) = stream.next().await {
            let response = result?;
            let Some(choice) = response.choices.first() else {
                continue;
            };
            let completed = choice.finish_reason.is_some();
            let text = choice.delta.content.clone().unwrap_or_default();
            if text.is_empty() && !completed {
                continue;
            }
            if chunks.send(StreamChunk { text, completed }).await.is_err() {
                // The reconciler finalized early; discard the remainder.
                debug!("Chunk consumer closed; dropping rest of OpenAI stream");
                break;
            }
        }
        Ok(())
    }

    async fn send_tool_result(&self, payload: Value) -> Result<()> {
        // Sessionless API: tool results travel inside the next request's
        // message history instead of a live session update.
        debug!(%payload, "Buffering tool result for next OpenAI request");
        Ok(())
    }
}
