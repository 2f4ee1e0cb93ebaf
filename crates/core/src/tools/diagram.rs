//! Diagram-request handling.
//!
//! The diagram renderer lives outside the core; this tool produces the
//! explanatory text and signals the UI to create the diagram. Output is
//! always text-only so narration never competes with the rendering UI.

use super::{Tool, ToolDescriptor, assemble_messages, query_arg, request_options,
    standard_query_schema};
use crate::provider::LanguageProvider;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "The learner asked for a diagram. In two sentences, describe what \
the diagram will show and the key parts to look at. Do not attempt to draw anything in text.";

pub const DIAGRAM_TOOL_NAME: &str = "diagram";

pub struct DiagramTool {
    provider: Arc<LanguageProvider>,
    descriptor: ToolDescriptor,
}

impl DiagramTool {
    pub fn new(provider: Arc<LanguageProvider>) -> Self {
        Self {
            provider,
            descriptor: ToolDescriptor {
                name: DIAGRAM_TOOL_NAME.to_string(),
                description: "Prepares a diagram of a concept for the learner".to_string(),
                capabilities: vec![
                    "diagram creation".to_string(),
                    "visual explanation".to_string(),
                ],
                use_when: vec![
                    "the learner asks to draw, diagram, sketch, or visualize something"
                        .to_string(),
                ],
                schema: standard_query_schema(),
            },
        }
    }
}

#[async_trait]
impl Tool for DiagramTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = query_arg(&args)?;
        let messages = assemble_messages(SYSTEM_PROMPT, &args, query);
        // Always the text path: the diagram UI owns the visual channel.
        let options = request_options(&args, true);
        let text = self.provider.generate_response(&messages, &options).await?;
        Ok(json!({
            "message": text,
            "metadata": {
                "should_create_diagram": true,
                "diagram_topic": query,
            },
        }))
    }
}
