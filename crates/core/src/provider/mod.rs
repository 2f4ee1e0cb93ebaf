//! The Language Provider Interface.
//!
//! Abstracts two (or more) interchangeable AI backends behind one surface:
//! synchronous text generation, streamed voice generation with
//! reconciliation, and tool-result forwarding. Owns provider selection and
//! fallback policy, per-provider lazy session initialization, and the
//! deterministic offline fallback used when no backend is configured.

pub mod gemini;
pub mod openai;
pub mod reconcile;

use crate::error::AgentError;
use crate::types::{Message, MessageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use reconcile::{EMPTY_STREAM_FALLBACK, ReconcileConfig, StreamChunk, reconcile};

/// Placeholder returned from the voice path while the true text arrives
/// asynchronously. Callers must treat it as "defer persistence until
/// reconciliation completes", never as the final answer.
pub const VOICE_PENDING_PLACEHOLDER: &str = "[voice response pending]";

/// Identity of a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Gemini,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::OpenAi => write!(f, "openai"),
            ProviderId::Gemini => write!(f, "gemini"),
        }
    }
}

/// Per-request options threaded from the orchestrator through the tools.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Answer over the streamed voice path.
    pub voice: bool,
    /// Force the synchronous text path even when voice is on. Tools with a
    /// visual UI channel set this to avoid competing audio output.
    pub text_only: bool,
    /// Correlation id for the query this request belongs to. Voice
    /// completions are keyed by this id, never by ambient state.
    pub query_id: Option<Uuid>,
}

impl RequestOptions {
    pub fn text() -> Self {
        Self::default()
    }

    pub fn wants_stream(&self) -> bool {
        self.voice && !self.text_only
    }
}

/// Announcement that a streamed response finished reconciling.
#[derive(Debug, Clone)]
pub struct VoiceCompletion {
    pub query_id: Uuid,
    pub text: String,
}

/// One interchangeable AI backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether requests carrying image data can be sent to this backend.
    fn supports_images(&self) -> bool;

    /// Performs the session handshake. Called exactly once per adapter by
    /// the interface; must be cheap to skip on adapters without sessions.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Synchronous text generation. No voice output.
    async fn generate_text(&self, messages: &[Message]) -> anyhow::Result<String>;

    /// Streams response text into `chunks` until the provider's turn ends.
    async fn stream_response(
        &self,
        messages: &[Message],
        chunks: mpsc::Sender<StreamChunk>,
    ) -> anyhow::Result<()>;

    /// Forwards a tool's output back into the provider session.
    async fn send_tool_result(&self, payload: Value) -> anyhow::Result<()>;
}

/// The dual-backend language provider interface.
pub struct LanguageProvider {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    default_provider: ProviderId,
    /// Providers whose session handshake has completed. Guarded by an async
    /// mutex held across initialization so concurrent callers cannot create
    /// duplicate sessions.
    initialized: Mutex<HashSet<ProviderId>>,
    reconcile_config: ReconcileConfig,
    completions: broadcast::Sender<VoiceCompletion>,
}

impl LanguageProvider {
    pub fn new(default_provider: ProviderId) -> Self {
        let (completions, _) = broadcast::channel(32);
        Self {
            adapters: HashMap::new(),
            default_provider,
            initialized: Mutex::new(HashSet::new()),
            reconcile_config: ReconcileConfig::default(),
            completions,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.id(), adapter);
        self
    }

    pub fn with_reconcile_config(mut self, config: ReconcileConfig) -> Self {
        self.reconcile_config = config;
        self
    }

    pub fn has_adapters(&self) -> bool {
        !self.adapters.is_empty()
    }

    /// Subscribes to reconciled voice completions. Events carry the query
    /// id they belong to.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<VoiceCompletion> {
        self.completions.subscribe()
    }

    /// Forgets completed handshakes so the next call re-initializes.
    pub async fn reset_sessions(&self) {
        self.initialized.lock().await.clear();
        info!("Provider sessions reset");
    }

    /// Selection policy: default provider, switched to the image-capable
    /// one for this call only when the request carries image data, with a
    /// transparent fallback to whichever backend is configured.
    fn select_adapter(&self, messages: &[Message]) -> Option<Arc<dyn ProviderAdapter>> {
        let wants_images = messages.iter().any(|m| m.image_data.is_some());

        let preferred = self.adapters.get(&self.default_provider).cloned();
        let chosen = match preferred {
            Some(adapter) if wants_images && !adapter.supports_images() => {
                let capable = self
                    .adapters
                    .values()
                    .find(|a| a.supports_images())
                    .cloned();
                match capable {
                    Some(capable) => {
                        info!(
                            from = %self.default_provider,
                            to = %capable.id(),
                            "Switching provider for image-bearing request"
                        );
                        Some(capable)
                    }
                    None => Some(adapter),
                }
            }
            Some(adapter) => Some(adapter),
            None => {
                let fallback = self.adapters.values().next().cloned();
                if let Some(fallback) = &fallback {
                    warn!(
                        wanted = %self.default_provider,
                        using = %fallback.id(),
                        "Default provider not configured; falling back"
                    );
                }
                fallback
            }
        };
        chosen
    }

    /// Initializes the adapter's session exactly once. The registry lock is
    /// held across the handshake so a concurrent caller waits instead of
    /// opening a second session.
    async fn ensure_initialized(&self, adapter: &Arc<dyn ProviderAdapter>) -> anyhow::Result<()> {
        let mut initialized = self.initialized.lock().await;
        if !initialized.contains(&adapter.id()) {
            adapter.initialize().await?;
            initialized.insert(adapter.id());
            info!(provider = %adapter.id(), "Provider session initialized");
        }
        Ok(())
    }

    /// Synchronous text generation, used for routing classification and by
    /// text-only tools. Never speaks and never substitutes the offline
    /// fallback: callers that can tolerate degraded text use
    /// [`Self::generate_response`] instead.
    pub async fn generate_text_response(
        &self,
        messages: &[Message],
    ) -> Result<String, AgentError> {
        let adapter = self
            .select_adapter(messages)
            .ok_or(AgentError::ProviderUnavailable)?;
        self.ensure_initialized(&adapter)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;
        adapter
            .generate_text(messages)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))
    }

    /// Full response generation.
    ///
    /// Text path: returns the provider's answer directly. Voice path:
    /// spawns the stream plus its reconciler and returns
    /// [`VOICE_PENDING_PLACEHOLDER`] immediately; the finalized text is
    /// announced as a [`VoiceCompletion`] keyed by the request's query id.
    /// With no backend configured, degrades to the deterministic offline
    /// fallback.
    pub async fn generate_response(
        &self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> Result<String, AgentError> {
        let Some(adapter) = self.select_adapter(messages) else {
            warn!("No provider configured; using offline fallback response");
            return Ok(offline_fallback(messages));
        };
        self.ensure_initialized(&adapter)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        if !options.wants_stream() {
            return adapter
                .generate_text(messages)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()));
        }

        let query_id = options.query_id.unwrap_or_else(Uuid::new_v4);
        let messages = messages.to_vec();
        let config = self.reconcile_config.clone();
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let (chunk_tx, chunk_rx) = mpsc::channel(32);
            let producer = {
                let adapter = adapter.clone();
                tokio::spawn(async move {
                    if let Err(e) = adapter.stream_response(&messages, chunk_tx).await {
                        error!(provider = %adapter.id(), error = %e, "Provider stream failed");
                    }
                })
            };

            let text = reconcile(chunk_rx, &config).await;
            // The producer may still be running after finalization; its
            // late chunks land in a closed channel and are discarded.
            producer.abort();

            if completions
                .send(VoiceCompletion { query_id, text })
                .is_err()
            {
                warn!(%query_id, "Voice completion had no subscribers");
            }
        });

        Ok(VOICE_PENDING_PLACEHOLDER.to_string())
    }

    /// Raw chunk access for callers that drive their own audio pipeline.
    pub async fn stream_audio(
        &self,
        messages: &[Message],
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<(), AgentError> {
        let adapter = self
            .select_adapter(messages)
            .ok_or(AgentError::ProviderUnavailable)?;
        self.ensure_initialized(&adapter)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;
        adapter
            .stream_response(messages, chunks)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))
    }

    /// Forwards a tool result to the active default provider session.
    pub async fn send_tool_result(&self, payload: Value) -> Result<(), AgentError> {
        let adapter = self
            .select_adapter(&[])
            .ok_or(AgentError::ProviderUnavailable)?;
        adapter
            .send_tool_result(payload)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))
    }
}

/// Deterministic last-resort response keyed by simple keyword matching over
/// the user's most recent message. Never used for routing decisions.
fn offline_fallback(messages: &[Message]) -> String {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.to_lowercase())
        .unwrap_or_default();

    if last_user.contains("hello") || last_user.contains("hi ") || last_user == "hi" {
        "Hello! I'm running without a connection right now, but I'm happy to help once I'm back online.".to_string()
    } else if last_user.contains("neural") {
        "A neural network is a layered model that learns patterns from examples by adjusting connection weights.".to_string()
    } else if last_user.contains("photosynthesis") {
        "Photosynthesis is how plants convert light, water, and carbon dioxide into energy and oxygen.".to_string()
    } else if last_user.contains("diagram") {
        "I can't draw right now because I'm offline, but try again once a provider is configured.".to_string()
    } else {
        "I'm offline at the moment and can't reach a language model. Please try again shortly.".to_string()
    }
}
