//! Spatial and visual analysis over an attached image.

use super::{Tool, ToolDescriptor, assemble_messages, query_arg, request_options};
use crate::executor::{ParamType, ParameterSchema};
use crate::provider::LanguageProvider;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You analyze the attached image for the learner. Describe the \
spatial layout and the relationships between elements, then answer the question about it.";

pub const SPATIAL_TOOL_NAME: &str = "spatial";

pub struct SpatialAnalysisTool {
    provider: Arc<LanguageProvider>,
    descriptor: ToolDescriptor,
}

impl SpatialAnalysisTool {
    pub fn new(provider: Arc<LanguageProvider>) -> Self {
        Self {
            provider,
            descriptor: ToolDescriptor {
                name: SPATIAL_TOOL_NAME.to_string(),
                description: "Analyzes an attached image or the spatial layout the learner \
                              describes"
                    .to_string(),
                capabilities: vec![
                    "image analysis".to_string(),
                    "spatial reasoning".to_string(),
                ],
                use_when: vec![
                    "the query asks about an image, screenshot, or drawing".to_string(),
                    "the query asks where things are relative to each other".to_string(),
                ],
                schema: ParameterSchema::new()
                    .required("query", ParamType::String, "The user's question")
                    .optional("context", ParamType::String, "Recent conversation turns")
                    .optional("summary", ParamType::String, "Active summary context")
                    .optional("voice", ParamType::Boolean, "Whether to answer with voice")
                    .optional("query_id", ParamType::String, "Correlation id")
                    .optional("image", ParamType::Array, "Raw image bytes"),
            },
        }
    }

    fn image_bytes(args: &Value) -> Option<Vec<u8>> {
        let bytes: Vec<u8> = args
            .get("image")?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect();
        if bytes.is_empty() { None } else { Some(bytes) }
    }
}

#[async_trait]
impl Tool for SpatialAnalysisTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = query_arg(&args)?;
        let mut messages = assemble_messages(SYSTEM_PROMPT, &args, query);
        if let Some(bytes) = Self::image_bytes(&args) {
            // Attaching the image to the user message lets the provider
            // interface switch to an image-capable backend.
            if let Some(last) = messages.pop() {
                messages.push(last.with_image(bytes));
            }
        }
        let options = request_options(&args, false);
        let text = self.provider.generate_response(&messages, &options).await?;
        Ok(Value::String(text))
    }
}
