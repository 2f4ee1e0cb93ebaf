//! Agent orchestration core for the Sage educational assistant.
//!
//! The pipeline: [`orchestrator::Orchestrator`] accepts one query at a time
//! and dispatches it through the [`executor::ToolExecutor`] to the
//! [`router::ToolRouter`], which classifies the query against the tool
//! catalog and runs the winning [`tools::Tool`]. Tools answer through the
//! [`provider::LanguageProvider`], which abstracts two interchangeable LLM
//! backends and reconciles streamed voice output into exactly one finalized
//! string. Finished turns land in the [`memory::MemorySystem`].

pub mod error;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod router;
pub mod store;
pub mod tools;
pub mod types;

pub use error::AgentError;
pub use executor::{DEFAULT_TOOL_TIMEOUT, ToolExecutor};
pub use memory::MemorySystem;
pub use orchestrator::{BUSY_RESPONSE, Orchestrator};
pub use provider::{
    LanguageProvider, ProviderAdapter, ProviderId, ReconcileConfig, RequestOptions, StreamChunk,
    VOICE_PENDING_PLACEHOLDER,
};
pub use router::{ROUTER_TOOL_NAME, ToolRouter};
pub use store::{InMemoryStore, JsonFileStore, KeyValueStore};
pub use types::{AgentEvent, ConversationTurn, Message, Session, ToolResponse, ToolResult};
