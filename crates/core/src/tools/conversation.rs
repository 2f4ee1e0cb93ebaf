//! General educational conversation, the routing default.

use super::{Tool, ToolDescriptor, assemble_messages, query_arg, request_options,
    standard_query_schema};
use crate::provider::LanguageProvider;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a friendly educational assistant. Explain concepts clearly \
and concisely at the learner's level. Keep answers under three sentences unless the learner \
asks for depth.";

pub const CONVERSATION_TOOL_NAME: &str = "conversation";

pub struct GeneralConversationTool {
    provider: Arc<LanguageProvider>,
    descriptor: ToolDescriptor,
}

impl GeneralConversationTool {
    pub fn new(provider: Arc<LanguageProvider>) -> Self {
        Self {
            provider,
            descriptor: ToolDescriptor {
                name: CONVERSATION_TOOL_NAME.to_string(),
                description: "Answers general educational questions and keeps the conversation \
                              going"
                    .to_string(),
                capabilities: vec![
                    "explanations".to_string(),
                    "follow-up questions".to_string(),
                    "general chat".to_string(),
                ],
                use_when: vec![
                    "the query is a general question or statement".to_string(),
                    "no other tool clearly applies".to_string(),
                ],
                schema: standard_query_schema(),
            },
        }
    }
}

#[async_trait]
impl Tool for GeneralConversationTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = query_arg(&args)?;
        let messages = assemble_messages(SYSTEM_PROMPT, &args, query);
        let options = request_options(&args, false);
        let text = self.provider.generate_response(&messages, &options).await?;
        Ok(Value::String(text))
    }
}
