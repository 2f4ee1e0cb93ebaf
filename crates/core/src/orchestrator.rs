//! Top-level per-query state machine.
//!
//! Accepts at most one query at a time, dispatches it through the routing
//! pipeline, reconciles streamed voice completions by correlation id,
//! persists the finished turn pair, and emits lifecycle events for UI
//! bridges. `process_query` never returns an error: every failure collapses
//! to an apology string plus a `SystemError` event, so callers always have
//! something to show the user.

use crate::error::AgentError;
use crate::executor::ToolExecutor;
use crate::memory::MemorySystem;
use crate::provider::{LanguageProvider, VOICE_PENDING_PLACEHOLDER, VoiceCompletion};
use crate::router::{ROUTER_TOOL_NAME, RouterTool, ToolRouter};
use crate::tools::conversation::CONVERSATION_TOOL_NAME;
use crate::tools::{
    DiagramTool, GeneralConversationTool, SpatialAnalysisTool, SummaryLookupTool, Tool,
};
use crate::types::{AgentEvent, ConversationTurn, Message, ToolResponse, TurnRole};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How long the orchestrator waits for a voice completion after receiving
/// the pending placeholder. Longer than the provider's own request timeout,
/// so the reconciler always gets to announce first.
const VOICE_COMPLETION_DEADLINE: Duration = Duration::from_secs(12);

/// Turns of history included as routing/tool context.
const CONTEXT_TURNS: usize = 6;

pub const BUSY_RESPONSE: &str =
    "I'm still working on your last question. Give me just a moment.";
const NOT_READY_RESPONSE: &str = "I'm still starting up. Try again in a moment.";
const DISABLED_RESPONSE: &str = "I'm paused right now. Re-enable me to continue.";
const ERROR_RESPONSE: &str =
    "Sorry, something went wrong while I was answering that. Could you try again?";
const VOICE_LOST_RESPONSE: &str =
    "I lost the rest of that answer partway through. Could you ask me again?";

/// Clears the in-flight flag when the query path exits, on every branch.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    provider: Arc<LanguageProvider>,
    executor: Arc<ToolExecutor>,
    router: Arc<ToolRouter>,
    memory: Arc<MemorySystem>,
    events: broadcast::Sender<AgentEvent>,
    busy: AtomicBool,
    ready: AtomicBool,
    enabled: AtomicBool,
    voice_enabled: AtomicBool,
    active_summary: RwLock<Option<String>>,
}

impl Orchestrator {
    pub fn new(provider: Arc<LanguageProvider>, memory: Arc<MemorySystem>) -> Arc<Self> {
        let executor = Arc::new(ToolExecutor::new());
        let router = Arc::new(ToolRouter::new(
            provider.clone(),
            &executor,
            CONVERSATION_TOOL_NAME,
        ));
        executor.register(Arc::new(RouterTool::new(router.clone())));

        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            provider,
            executor,
            router,
            memory,
            events,
            busy: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            voice_enabled: AtomicBool::new(true),
            active_summary: RwLock::new(None),
        })
    }

    /// Restores persisted memory, registers the builtin tools, and opens a
    /// session. Must run before the first query.
    pub async fn initialize(&self) -> Result<(), AgentError> {
        self.memory.load_from_storage().await?;
        self.register_tool(Arc::new(GeneralConversationTool::new(self.provider.clone())));
        self.register_tool(Arc::new(SummaryLookupTool::new(self.provider.clone())));
        self.register_tool(Arc::new(SpatialAnalysisTool::new(self.provider.clone())));
        self.register_tool(Arc::new(DiagramTool::new(self.provider.clone())));
        if self.memory.active_session().is_none() {
            self.memory.start_session("learning");
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(tools = ?self.router.catalog_names(), "Agent initialized");
        Ok(())
    }

    /// Adds a tool to the routing catalog and the executor registry.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.router.register(tool);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "Agent enabled state changed");
    }

    pub fn set_voice_enabled(&self, enabled: bool) {
        self.voice_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_summary(&self, summary: Option<String>) {
        *self
            .active_summary
            .write()
            .expect("summary lock poisoned") = summary;
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.memory.history()
    }

    pub fn active_session(&self) -> Option<crate::types::Session> {
        self.memory.active_session()
    }

    /// Handles one query end to end. Infallible by contract: gate checks
    /// and failures all map to a user-facing string.
    pub async fn process_query(&self, query: &str, voice: bool) -> String {
        if !self.ready.load(Ordering::SeqCst) {
            warn!(error = %AgentError::NotReady, "Query rejected before initialization");
            return NOT_READY_RESPONSE.to_string();
        }
        if !self.enabled.load(Ordering::SeqCst) {
            return DISABLED_RESPONSE.to_string();
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Query rejected: another query is in flight");
            return BUSY_RESPONSE.to_string();
        }
        let _guard = BusyGuard(&self.busy);

        let query_id = Uuid::new_v4();
        info!(%query_id, query, "Processing query");
        self.emit(AgentEvent::QueryReceived {
            query_id,
            query: query.to_string(),
        });

        // Subscribe before dispatch so a fast completion cannot be missed.
        let completions = self.provider.subscribe_completions();

        match self.run_query(query_id, query, voice, completions).await {
            Ok((text, tool)) => {
                self.persist_turn_pair(query, &text, &tool).await;
                self.emit(AgentEvent::QueryProcessed {
                    query_id,
                    query: query.to_string(),
                    response: text.clone(),
                    tool,
                });
                text
            }
            Err(e) => {
                error!(%query_id, error = %e, "Query failed");
                self.emit(AgentEvent::SystemError {
                    message: e.to_string(),
                });
                ERROR_RESPONSE.to_string()
            }
        }
    }

    async fn run_query(
        &self,
        query_id: Uuid,
        query: &str,
        voice: bool,
        mut completions: broadcast::Receiver<VoiceCompletion>,
    ) -> anyhow::Result<(String, String)> {
        let mut args = json!({
            "query": query,
            "voice": voice && self.voice_enabled.load(Ordering::SeqCst),
            "query_id": query_id.to_string(),
        });
        let context = self.context_window();
        if !context.is_empty() {
            args["context"] = json!(context);
        }
        if let Some(summary) = self
            .active_summary
            .read()
            .expect("summary lock poisoned")
            .clone()
        {
            args["summary"] = json!(summary);
        }

        let result = self.executor.execute(ROUTER_TOOL_NAME, args).await;
        if !result.success {
            anyhow::bail!(
                result
                    .error
                    .unwrap_or_else(|| "tool execution failed".to_string())
            );
        }
        let value = result.result.unwrap_or(serde_json::Value::Null);
        let tool = value
            .get("tool")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(CONVERSATION_TOOL_NAME)
            .to_string();
        let response = ToolResponse::from_value(&value)
            .ok_or_else(|| anyhow::anyhow!("tool '{tool}' returned no usable text"))?;
        let mut text = response.into_text();

        if text == VOICE_PENDING_PLACEHOLDER {
            text = self.await_voice_completion(query_id, query, &mut completions).await;
        }
        Ok((text, tool))
    }

    /// Waits for the reconciled text belonging to this query. Completions
    /// for other queries are skipped, never consumed as ours.
    async fn await_voice_completion(
        &self,
        query_id: Uuid,
        query: &str,
        completions: &mut broadcast::Receiver<VoiceCompletion>,
    ) -> String {
        let deadline = tokio::time::sleep(VOICE_COMPLETION_DEADLINE);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(%query_id, "Voice completion deadline elapsed");
                    return VOICE_LOST_RESPONSE.to_string();
                }
                received = completions.recv() => match received {
                    Ok(completion) if completion.query_id == query_id => {
                        self.emit(AgentEvent::VoiceCompleted {
                            query_id,
                            query: query.to_string(),
                            text: completion.text.clone(),
                        });
                        return completion.text;
                    }
                    Ok(stale) => {
                        warn!(got = %stale.query_id, want = %query_id, "Skipping stale voice completion");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Voice completion receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return VOICE_LOST_RESPONSE.to_string();
                    }
                },
            }
        }
    }

    async fn persist_turn_pair(&self, query: &str, response: &str, tool: &str) {
        self.memory.append_message(Message::user(query));
        self.memory.append_message(Message::assistant(response));
        self.memory
            .append_turn(ConversationTurn::new(TurnRole::User, query, vec![]));
        self.memory.append_turn(ConversationTurn::new(
            TurnRole::Bot,
            response,
            vec![tool.to_string()],
        ));
        if let Err(e) = self.memory.save_to_storage().await {
            // Persistence failure must not eat an answer already produced.
            error!(error = %e, "Failed to persist conversation turns");
        }
    }

    fn context_window(&self) -> String {
        self.memory
            .recent_turns(CONTEXT_TURNS)
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Clears memory and forgets provider sessions. In-flight work is left
    /// to finish; its late results land against a cleared history.
    pub async fn reset(&self) -> Result<(), AgentError> {
        self.memory.clear().await?;
        self.provider.reset_sessions().await;
        self.set_summary(None);
        self.memory.start_session("learning");
        self.emit(AgentEvent::SystemReset);
        info!("Agent reset");
        Ok(())
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is normal in headless use.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ParamType, ParameterSchema};
    use crate::provider::{MockProviderAdapter, ProviderId, StreamChunk};
    use crate::store::InMemoryStore;
    use crate::tools::ToolDescriptor;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    /// Adapter whose first text call answers the routing classifier and
    /// whose later calls answer the routed tool.
    fn scripted_adapter(classify_as: &'static str, answer: &'static str) -> MockProviderAdapter {
        let calls = AtomicUsize::new(0);
        let mut mock = MockProviderAdapter::new();
        mock.expect_id().return_const(ProviderId::OpenAi);
        mock.expect_supports_images().return_const(true);
        mock.expect_initialize().returning(|| Ok(()));
        mock.expect_generate_text().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(classify_as.to_string())
            } else {
                Ok(answer.to_string())
            }
        });
        mock
    }

    async fn orchestrator_with(adapter: MockProviderAdapter) -> Arc<Orchestrator> {
        let provider =
            Arc::new(LanguageProvider::new(ProviderId::OpenAi).with_adapter(Arc::new(adapter)));
        let memory = Arc::new(MemorySystem::new(Arc::new(InMemoryStore::new())));
        let orchestrator = Orchestrator::new(provider, memory);
        orchestrator.initialize().await.unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn test_text_query_end_to_end() {
        let orchestrator = orchestrator_with(scripted_adapter(
            "conversation",
            "A neural network is a layered model.",
        ))
        .await;

        let reply = orchestrator
            .process_query("What is a neural network?", false)
            .await;
        assert_eq!(reply, "A neural network is a layered model.");

        let history = orchestrator.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, TurnRole::User);
        assert_eq!(history[0].content, "What is a neural network?");
        assert_eq!(history[1].role, TurnRole::Bot);
        assert_eq!(history[1].related_tools, vec!["conversation".to_string()]);
    }

    #[tokio::test]
    async fn test_diagram_query_extracts_message_from_structured_result() {
        let orchestrator = orchestrator_with(scripted_adapter(
            "diagram",
            "This diagram shows light becoming sugar.",
        ))
        .await;

        let reply = orchestrator
            .process_query("draw me a diagram of photosynthesis", false)
            .await;
        // The structured {"message", "metadata"} shape collapses to its message.
        assert_eq!(reply, "This diagram shows light becoming sugar.");
        assert_eq!(
            orchestrator.history()[1].related_tools,
            vec!["diagram".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unrecognized_classification_falls_back_to_conversation() {
        let orchestrator =
            orchestrator_with(scripted_adapter("no_such_tool", "fallback answer")).await;

        let reply = orchestrator.process_query("anything", false).await;
        assert_eq!(reply, "fallback answer");
        assert_eq!(
            orchestrator.history()[1].related_tools,
            vec!["conversation".to_string()]
        );
    }

    #[tokio::test]
    async fn test_query_before_initialize_is_rejected() {
        let provider = Arc::new(LanguageProvider::new(ProviderId::OpenAi));
        let memory = Arc::new(MemorySystem::new(Arc::new(InMemoryStore::new())));
        let orchestrator = Orchestrator::new(provider, memory);

        let reply = orchestrator.process_query("hello", false).await;
        assert_eq!(reply, NOT_READY_RESPONSE);
        assert!(orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_agent_declines() {
        let orchestrator = orchestrator_with(scripted_adapter("conversation", "hi")).await;
        orchestrator.set_enabled(false);
        assert_eq!(
            orchestrator.process_query("hello", false).await,
            DISABLED_RESPONSE
        );

        orchestrator.set_enabled(true);
        assert_eq!(orchestrator.process_query("hello", false).await, "hi");
    }

    struct SlowTool {
        descriptor: ToolDescriptor,
    }

    impl SlowTool {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                descriptor: ToolDescriptor {
                    name: "slow".to_string(),
                    description: "takes a while".to_string(),
                    capabilities: vec![],
                    use_when: vec![],
                    schema: ParameterSchema::new().required(
                        "query",
                        ParamType::String,
                        "the query",
                    ),
                },
            })
        }
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Value::String("slow answer".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_query_while_busy_is_rejected() {
        let orchestrator = orchestrator_with(scripted_adapter("slow", "unused")).await;
        orchestrator.register_tool(SlowTool::new());

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.process_query("take your time", false).await })
        };
        // Let the first query reach the slow tool.
        tokio::task::yield_now().await;
        assert!(orchestrator.is_busy());

        let second = orchestrator.process_query("quick question", false).await;
        assert_eq!(second, BUSY_RESPONSE);

        assert_eq!(first.await.unwrap(), "slow answer");
        assert!(!orchestrator.is_busy());
        // Only the completed query was persisted.
        assert_eq!(orchestrator.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_query_waits_for_reconciled_text() {
        let calls = AtomicUsize::new(0);
        let mut mock = MockProviderAdapter::new();
        mock.expect_id().return_const(ProviderId::OpenAi);
        mock.expect_supports_images().return_const(true);
        mock.expect_initialize().returning(|| Ok(()));
        // First text call is the routing classification.
        mock.expect_generate_text().returning(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("conversation".to_string())
        });
        mock.expect_stream_response().returning(|_, chunks| {
            let chunks = chunks.clone();
            tokio::spawn(async move {
                let _ = chunks.send(StreamChunk::text("Streamed ")).await;
                let _ = chunks.send(StreamChunk::completed("voice answer.")).await;
            });
            Ok(())
        });

        let orchestrator = orchestrator_with(mock).await;
        let mut events = orchestrator.subscribe_events();

        let reply = orchestrator.process_query("explain gravity", true).await;
        assert_eq!(reply, "Streamed voice answer.");

        // The placeholder must never be persisted.
        let history = orchestrator.history();
        assert_eq!(history[1].content, "Streamed voice answer.");

        let mut saw_voice_completed = false;
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::VoiceCompleted { text, .. } = event {
                assert_eq!(text, "Streamed voice answer.");
                saw_voice_completed = true;
            }
        }
        assert!(saw_voice_completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_disabled_forces_text_path() {
        let orchestrator =
            orchestrator_with(scripted_adapter("conversation", "typed answer")).await;
        orchestrator.set_voice_enabled(false);

        let reply = orchestrator.process_query("explain gravity", true).await;
        assert_eq!(reply, "typed answer");
    }

    struct FailingTool {
        descriptor: ToolDescriptor,
    }

    #[async_trait]
    impl Tool for FailingTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
            Err(anyhow::anyhow!("backend exploded"))
        }
    }

    #[tokio::test]
    async fn test_tool_failure_returns_apology_and_emits_error() {
        let orchestrator = orchestrator_with(scripted_adapter("broken", "unused")).await;
        orchestrator.register_tool(Arc::new(FailingTool {
            descriptor: ToolDescriptor {
                name: "broken".to_string(),
                description: "always fails".to_string(),
                capabilities: vec![],
                use_when: vec![],
                schema: ParameterSchema::new().required("query", ParamType::String, "the query"),
            },
        }));
        let mut events = orchestrator.subscribe_events();

        let reply = orchestrator.process_query("break please", false).await;
        assert_eq!(reply, ERROR_RESPONSE);
        // Failed queries persist nothing.
        assert!(orchestrator.history().is_empty());

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::SystemError { message } = event {
                assert!(message.contains("backend exploded"));
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_reset_clears_history_and_emits_event() {
        let orchestrator = orchestrator_with(scripted_adapter("conversation", "hi")).await;
        orchestrator.process_query("hello", false).await;
        assert_eq!(orchestrator.history().len(), 2);

        let mut events = orchestrator.subscribe_events();
        orchestrator.reset().await.unwrap();
        assert!(orchestrator.history().is_empty());
        assert!(orchestrator.memory.active_session().is_some());
        assert!(matches!(
            events.try_recv().unwrap(),
            AgentEvent::SystemReset
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let orchestrator = orchestrator_with(scripted_adapter("conversation", "answer")).await;
        let mut events = orchestrator.subscribe_events();

        orchestrator.process_query("hello", false).await;

        assert!(matches!(
            events.try_recv().unwrap(),
            AgentEvent::QueryReceived { .. }
        ));
        match events.try_recv().unwrap() {
            AgentEvent::QueryProcessed { response, tool, .. } => {
                assert_eq!(response, "answer");
                assert_eq!(tool, "conversation");
            }
            other => panic!("expected QueryProcessed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_context_window_includes_recent_turns() {
        let orchestrator = orchestrator_with(scripted_adapter("conversation", "answer")).await;
        orchestrator
            .memory
            .append_turn(ConversationTurn::new(TurnRole::User, "earlier question", vec![]));
        orchestrator
            .memory
            .append_turn(ConversationTurn::new(TurnRole::Bot, "earlier answer", vec![]));

        let context = orchestrator.context_window();
        assert_eq!(context, "user: earlier question\nbot: earlier answer");
    }
}
