//! LLM-driven query routing.
//!
//! The router keeps a catalog of tool descriptions and use-when hints, asks
//! the language provider to classify a query against it, and dispatches to
//! the winning tool through the executor so every tool gets the same
//! validation and timeout harness. Adding a tool means registering a
//! natural-language description; the router contains no tool-specific
//! conditionals.

use crate::executor::{ParamType, ParameterSchema, ToolExecutor};
use crate::provider::LanguageProvider;
use crate::tools::{Tool, ToolDescriptor};
use crate::types::{Message, ToolResult};
use async_trait::async_trait;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info, warn};

/// Minimum skim score for a fuzzy hit when the classifier token is not an
/// exact or substring match.
const FUZZY_MATCH_THRESHOLD: i64 = 50;

/// Catalog entry describing when a tool should win the routing decision.
#[derive(Debug, Clone)]
struct CatalogEntry {
    description: String,
    capabilities: Vec<String>,
    use_when: Vec<String>,
}

/// Classifies queries against the tool catalog and dispatches the winner.
pub struct ToolRouter {
    provider: Arc<LanguageProvider>,
    /// The executor owns the router (as its registered "router" tool), so
    /// this back-reference is weak to avoid a retain cycle.
    executor: Weak<ToolExecutor>,
    catalog: RwLock<HashMap<String, CatalogEntry>>,
    default_tool: String,
}

impl ToolRouter {
    pub fn new(
        provider: Arc<LanguageProvider>,
        executor: &Arc<ToolExecutor>,
        default_tool: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            executor: Arc::downgrade(executor),
            catalog: RwLock::new(HashMap::new()),
            default_tool: default_tool.into(),
        }
    }

    /// Adds a tool to the routing catalog and registers it with the
    /// executor.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor();
        let entry = CatalogEntry {
            description: descriptor.description.clone(),
            capabilities: descriptor.capabilities.clone(),
            use_when: descriptor.use_when.clone(),
        };
        self.catalog
            .write()
            .expect("router catalog lock poisoned")
            .insert(descriptor.name.clone(), entry);
        if let Some(executor) = self.executor.upgrade() {
            executor.register(tool);
        }
        info!("Tool added to routing catalog");
    }

    pub fn catalog_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .catalog
            .read()
            .expect("router catalog lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Routes a query: classify, resolve the winning tool name, dispatch.
    ///
    /// Classification always uses the synchronous text path — routing must
    /// never speak. A classification failure or an unrecognized token falls
    /// back to the default tool instead of propagating.
    pub async fn route_query(&self, query: &str, args: Value) -> ToolResult {
        let Some(executor) = self.executor.upgrade() else {
            return ToolResult::fail("executor is no longer available", 0);
        };

        let tool_name = match self.classify(query, &args).await {
            Ok(token) => self.resolve_tool_name(&token),
            Err(e) => {
                warn!(error = %e, "Classification failed; using default tool");
                self.default_tool.clone()
            }
        };

        debug!(tool = %tool_name, "Routing decision");
        let result = executor.execute(&tool_name, args).await;
        attach_tool_name(result, &tool_name)
    }

    /// Asks the provider to pick a tool name for the query.
    async fn classify(&self, query: &str, args: &Value) -> Result<String, crate::error::AgentError> {
        let summary = args.get("summary").and_then(Value::as_str);
        let prompt = self.build_classification_prompt(query, summary);
        let messages = [
            Message::system(
                "You are a routing classifier for an educational assistant. \
                 Reply with exactly one tool name from the catalog and nothing else.",
            ),
            Message::user(prompt),
        ];
        self.provider.generate_text_response(&messages).await
    }

    fn build_classification_prompt(&self, query: &str, summary: Option<&str>) -> String {
        let catalog = self.catalog.read().expect("router catalog lock poisoned");
        let mut names: Vec<&String> = catalog.keys().collect();
        names.sort();

        let mut prompt = String::from("Available tools:\n");
        for name in names {
            let entry = &catalog[name];
            prompt.push_str(&format!("- {}: {}\n", name, entry.description));
            if !entry.capabilities.is_empty() {
                prompt.push_str(&format!(
                    "  Capabilities: {}\n",
                    entry.capabilities.join(", ")
                ));
            }
            for hint in &entry.use_when {
                prompt.push_str(&format!("  Use when: {}\n", hint));
            }
        }
        if let Some(summary) = summary {
            prompt.push_str(&format!("\nActive summary context: {}\n", summary));
        }
        prompt.push_str(&format!("\nUser query: {}\n\nBest tool name:", query));
        prompt
    }

    /// Resolves the classifier's token to a registered tool name.
    ///
    /// Exact match first, then case-insensitive substring in either
    /// direction, then a fuzzy match above a score threshold. Anything else
    /// resolves to the default tool.
    fn resolve_tool_name(&self, token: &str) -> String {
        let token = token.trim().trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
        let lowered = token.to_lowercase();
        let catalog = self.catalog.read().expect("router catalog lock poisoned");

        if catalog.contains_key(token) {
            return token.to_string();
        }
        for name in catalog.keys() {
            let name_lower = name.to_lowercase();
            if lowered.contains(&name_lower) || name_lower.contains(&lowered) {
                return name.clone();
            }
        }

        let matcher = SkimMatcherV2::default();
        let best = catalog
            .keys()
            .filter_map(|name| matcher.fuzzy_match(name, &lowered).map(|score| (score, name)))
            .max_by_key(|(score, _)| *score);
        if let Some((score, name)) = best {
            if score >= FUZZY_MATCH_THRESHOLD {
                debug!(token = %token, resolved = %name, score, "Fuzzy-matched classifier token");
                return name.clone();
            }
        }

        warn!(token = %token, "Classifier returned an unrecognized tool; using default");
        self.default_tool.clone()
    }
}

/// Wraps the inner tool result so the orchestrator can report which tool
/// handled the query.
fn attach_tool_name(result: ToolResult, tool_name: &str) -> ToolResult {
    if result.success {
        ToolResult {
            result: Some(serde_json::json!({
                "tool": tool_name,
                "result": result.result,
            })),
            ..result
        }
    } else {
        result
    }
}

/// The router exposed as the executor's registered `"router"` tool: the
/// orchestrator's single entry point into the routing pipeline.
pub struct RouterTool {
    router: Arc<ToolRouter>,
    descriptor: ToolDescriptor,
}

pub const ROUTER_TOOL_NAME: &str = "router";

impl RouterTool {
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self {
            router,
            descriptor: ToolDescriptor {
                name: ROUTER_TOOL_NAME.to_string(),
                description: "Classifies a query and dispatches the best domain tool".to_string(),
                capabilities: vec![],
                use_when: vec![],
                schema: ParameterSchema::new()
                    .required("query", ParamType::String, "The user's question")
                    .optional("context", ParamType::String, "Recent conversation turns")
                    .optional("summary", ParamType::String, "Active summary context")
                    .optional("voice", ParamType::Boolean, "Whether to answer with voice")
                    .optional("query_id", ParamType::String, "Correlation id"),
            },
        }
    }
}

#[async_trait]
impl Tool for RouterTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = crate::tools::query_arg(&args)?.to_string();
        let result = self.router.route_query(&query, args).await;
        if result.success {
            Ok(result.result.unwrap_or(Value::Null))
        } else {
            Err(anyhow::anyhow!(
                result
                    .error
                    .unwrap_or_else(|| "tool execution failed".to_string())
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProviderAdapter, ProviderId};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingTool {
        descriptor: ToolDescriptor,
        calls: Arc<AtomicUsize>,
        reply: Value,
    }

    impl RecordingTool {
        fn new(name: &str, description: &str, reply: Value) -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let tool = Arc::new(Self {
                descriptor: ToolDescriptor {
                    name: name.to_string(),
                    description: description.to_string(),
                    capabilities: vec!["testing".to_string()],
                    use_when: vec![format!("the query mentions {}", name)],
                    schema: ParameterSchema::new().required(
                        "query",
                        ParamType::String,
                        "the query",
                    ),
                },
                calls: calls.clone(),
                reply,
            });
            (tool, calls)
        }
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn provider_classifying_as(token: &'static str) -> Arc<LanguageProvider> {
        let mut mock = MockProviderAdapter::new();
        mock.expect_id().return_const(ProviderId::OpenAi);
        mock.expect_supports_images().return_const(true);
        mock.expect_initialize().returning(|| Ok(()));
        mock.expect_generate_text()
            .returning(move |_| Ok(token.to_string()));
        Arc::new(LanguageProvider::new(ProviderId::OpenAi).with_adapter(Arc::new(mock)))
    }

    fn build_router(provider: Arc<LanguageProvider>) -> (Arc<ToolExecutor>, Arc<ToolRouter>) {
        let executor = Arc::new(ToolExecutor::new());
        let router = Arc::new(ToolRouter::new(provider, &executor, "conversation"));
        (executor, router)
    }

    #[tokio::test]
    async fn test_routes_to_classified_tool() {
        let provider = provider_classifying_as("diagram");
        let (_executor, router) = build_router(provider);
        let (conversation, conv_calls) =
            RecordingTool::new("conversation", "general chat", json!("chat"));
        let (diagram, diagram_calls) =
            RecordingTool::new("diagram", "draws diagrams", json!({"message": "drawn"}));
        router.register(conversation);
        router.register(diagram);

        let result = router
            .route_query("draw photosynthesis", json!({"query": "draw photosynthesis"}))
            .await;
        assert!(result.success);
        assert_eq!(diagram_calls.load(Ordering::SeqCst), 1);
        assert_eq!(conv_calls.load(Ordering::SeqCst), 0);

        let value = result.result.unwrap();
        assert_eq!(value["tool"], json!("diagram"));
        assert_eq!(value["result"]["message"], json!("drawn"));
    }

    #[tokio::test]
    async fn test_unrecognized_token_falls_back_to_default() {
        let provider = provider_classifying_as("nonsense_tool");
        let (_executor, router) = build_router(provider);
        let (conversation, conv_calls) =
            RecordingTool::new("conversation", "general chat", json!("fallback answer"));
        router.register(conversation);

        let result = router
            .route_query("anything", json!({"query": "anything"}))
            .await;
        assert!(result.success);
        assert_eq!(conv_calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.result.unwrap()["result"], json!("fallback answer"));
    }

    #[tokio::test]
    async fn test_classifier_error_falls_back_to_default() {
        // No adapters configured: classification errors with
        // ProviderUnavailable and must not propagate.
        let provider = Arc::new(LanguageProvider::new(ProviderId::OpenAi));
        let (_executor, router) = build_router(provider);
        let (conversation, conv_calls) =
            RecordingTool::new("conversation", "general chat", json!("still works"));
        router.register(conversation);

        let result = router
            .route_query("anything", json!({"query": "anything"}))
            .await;
        assert!(result.success);
        assert_eq!(conv_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_substring_token_resolution() {
        let provider = provider_classifying_as("I would pick the Diagram tool.");
        let (_executor, router) = build_router(provider);
        let (conversation, _) = RecordingTool::new("conversation", "general chat", json!("chat"));
        let (diagram, diagram_calls) =
            RecordingTool::new("diagram", "draws diagrams", json!("drawn"));
        router.register(conversation);
        router.register(diagram);

        router
            .route_query("draw it", json!({"query": "draw it"}))
            .await;
        assert_eq!(diagram_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classification_prompt_enumerates_catalog() {
        let provider = provider_classifying_as("conversation");
        let (_executor, router) = build_router(provider);
        let (conversation, _) =
            RecordingTool::new("conversation", "general educational chat", json!("ok"));
        let (summary, _) = RecordingTool::new("summary", "looks up lesson summaries", json!("ok"));
        router.register(conversation);
        router.register(summary);

        let prompt = router.build_classification_prompt("what is light?", Some("optics lesson"));
        assert!(prompt.contains("- conversation: general educational chat"));
        assert!(prompt.contains("- summary: looks up lesson summaries"));
        assert!(prompt.contains("Use when: the query mentions summary"));
        assert!(prompt.contains("Active summary context: optics lesson"));
        assert!(prompt.contains("what is light?"));
    }

    #[tokio::test]
    async fn test_router_tool_surfaces_inner_failure() {
        let provider = provider_classifying_as("conversation");
        let executor = Arc::new(ToolExecutor::new());
        let router = Arc::new(ToolRouter::new(provider, &executor, "conversation"));
        // Default tool never registered: dispatch fails inside the executor.
        let router_tool = RouterTool::new(router);

        let err = router_tool
            .execute(json!({"query": "anything"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }
}
