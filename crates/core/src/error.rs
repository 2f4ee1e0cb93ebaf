//! Error taxonomy for the agent orchestration core.
//!
//! Every failure that can surface from a query is represented here so that
//! the orchestrator has a single shape to degrade into a user-facing string.

/// Errors produced by the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The requested tool is not present in the executor registry.
    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),

    /// Tool arguments failed schema validation. The handler was never invoked.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A tool handler or provider call exceeded its budget.
    #[error("{what} timed out after {}ms", budget.as_millis())]
    Timeout {
        what: String,
        budget: std::time::Duration,
    },

    /// Neither language provider is configured.
    #[error("no language provider is available")]
    ProviderUnavailable,

    /// A configured provider returned an error.
    #[error("provider request failed: {0}")]
    Provider(String),

    /// A query arrived before the system finished initializing.
    #[error("the system is not ready to accept queries")]
    NotReady,

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(String),
}
