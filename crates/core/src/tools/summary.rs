//! Lookup and explanation against the active lesson summary.

use super::{Tool, ToolDescriptor, assemble_messages, query_arg, request_options,
    standard_query_schema};
use crate::provider::LanguageProvider;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You answer questions strictly from the provided lesson summary. \
Quote or paraphrase the relevant part. If the summary does not cover the question, say so \
plainly instead of guessing.";

pub const SUMMARY_TOOL_NAME: &str = "summary";

pub struct SummaryLookupTool {
    provider: Arc<LanguageProvider>,
    descriptor: ToolDescriptor,
}

impl SummaryLookupTool {
    pub fn new(provider: Arc<LanguageProvider>) -> Self {
        Self {
            provider,
            descriptor: ToolDescriptor {
                name: SUMMARY_TOOL_NAME.to_string(),
                description: "Looks up answers in the active lesson summary".to_string(),
                capabilities: vec![
                    "summary lookup".to_string(),
                    "grounded explanation".to_string(),
                ],
                use_when: vec![
                    "the query refers to the current summary, notes, or lesson".to_string(),
                    "the learner asks what a loaded document says".to_string(),
                ],
                schema: standard_query_schema(),
            },
        }
    }
}

#[async_trait]
impl Tool for SummaryLookupTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = query_arg(&args)?;
        if args.get("summary").and_then(Value::as_str).is_none() {
            return Ok(json!({
                "message": "There's no summary loaded right now. Load one and ask me again.",
                "metadata": { "summary_present": false },
            }));
        }
        let messages = assemble_messages(SYSTEM_PROMPT, &args, query);
        let options = request_options(&args, false);
        let text = self.provider.generate_response(&messages, &options).await?;
        Ok(json!({
            "message": text,
            "metadata": { "summary_present": true },
        }))
    }
}
