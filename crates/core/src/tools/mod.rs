//! The uniform tool contract and the builtin domain tools.
//!
//! A tool is a registered async capability with a declared parameter schema
//! and natural-language routing hints. Tool implementations stay free of
//! defensive boilerplate: the executor validates arguments and enforces the
//! timeout before a handler ever runs.

pub mod conversation;
pub mod diagram;
pub mod spatial;
pub mod summary;

use crate::executor::ParameterSchema;
use crate::provider::RequestOptions;
use crate::types::Message;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

pub use conversation::GeneralConversationTool;
pub use diagram::DiagramTool;
pub use spatial::SpatialAnalysisTool;
pub use summary::SummaryLookupTool;

/// Static description of a tool: identity, routing hints, and the declared
/// parameter schema. Registered once at startup; names are unique within a
/// registry.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Short capability labels shown to the routing classifier.
    pub capabilities: Vec<String>,
    /// Natural-language routing rules. Consumed only by the classification
    /// prompt, never executed as code.
    pub use_when: Vec<String>,
    pub schema: ParameterSchema,
}

/// A registered async capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Runs the tool. Arguments have already passed schema validation.
    /// Errors are surfaced as `ToolResult::error` by the executor.
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// The argument schema shared by every builtin domain tool: the routed
/// query plus the optional context the orchestrator assembles.
pub(crate) fn standard_query_schema() -> ParameterSchema {
    use crate::executor::ParamType;
    ParameterSchema::new()
        .required("query", ParamType::String, "The user's question")
        .optional(
            "context",
            ParamType::String,
            "Recent conversation turns, newest last",
        )
        .optional("summary", ParamType::String, "Active summary context")
        .optional("voice", ParamType::Boolean, "Whether to answer with voice")
        .optional(
            "query_id",
            ParamType::String,
            "Correlation id for streamed completions",
        )
}

/// Extracts the required `query` string from tool arguments.
pub(crate) fn query_arg(args: &Value) -> anyhow::Result<&str> {
    args.get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing 'query' argument"))
}

/// Builds the provider request options a routed call carries: the voice
/// flag and the correlation id, both threaded through the argument object.
pub(crate) fn request_options(args: &Value, text_only: bool) -> RequestOptions {
    RequestOptions {
        voice: args.get("voice").and_then(Value::as_bool).unwrap_or(false),
        text_only,
        query_id: args
            .get("query_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok()),
    }
}

/// Assembles the message list for a domain tool: system prompt, then the
/// optional summary and recent-turn context, then the query itself.
pub(crate) fn assemble_messages(system_prompt: &str, args: &Value, query: &str) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt)];
    if let Some(summary) = args.get("summary").and_then(Value::as_str) {
        messages.push(Message::system(format!(
            "The learner is working from this summary:\n{summary}"
        )));
    }
    if let Some(context) = args.get("context").and_then(Value::as_str) {
        if !context.is_empty() {
            messages.push(Message::system(format!(
                "Recent conversation, newest last:\n{context}"
            )));
        }
    }
    messages.push(Message::user(query));
    messages
}
