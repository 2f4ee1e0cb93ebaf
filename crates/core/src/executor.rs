//! Tool registration, argument validation, and the timeout harness.
//!
//! The executor owns the tool registry. Centralizing validation and the
//! timeout race here gives the orchestrator one failure shape to handle and
//! keeps individual tools free of defensive code.

use crate::tools::Tool;
use crate::types::ToolResult;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Default budget for a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(15);

/// Primitive types a tool parameter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// Declaration for a single tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub kind: ParamType,
    pub required: bool,
    pub allowed_values: Option<Vec<String>>,
    pub description: String,
}

/// Declared parameter schema for a tool. Validated by the executor before
/// the handler is invoked.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    params: Vec<(String, ParamSpec)>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.params.push((
            name.into(),
            ParamSpec {
                kind,
                required: true,
                allowed_values: None,
                description: description.into(),
            },
        ));
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.params.push((
            name.into(),
            ParamSpec {
                kind,
                required: false,
                allowed_values: None,
                description: description.into(),
            },
        ));
        self
    }

    /// Restricts the most recently declared parameter to an enumerated set.
    pub fn with_allowed_values(mut self, values: &[&str]) -> Self {
        if let Some((_, spec)) = self.params.last_mut() {
            spec.allowed_values = Some(values.iter().map(|v| v.to_string()).collect());
        }
        self
    }

    pub fn params(&self) -> &[(String, ParamSpec)] {
        &self.params
    }

    /// Validates arguments against this schema.
    ///
    /// Every required field must be present and non-null. Each present,
    /// non-null field must match its declared primitive type and, when an
    /// enumeration is declared, be a member of it. Null values on optional
    /// fields are accepted.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let map = match args {
            Value::Object(map) => map,
            Value::Null if self.params.iter().all(|(_, s)| !s.required) => return Ok(()),
            _ => return Err("arguments must be a JSON object".to_string()),
        };

        for (name, spec) in &self.params {
            match map.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(format!("missing required field '{}'", name));
                    }
                }
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(format!(
                            "field '{}' must be a {}",
                            name,
                            spec.kind.name()
                        ));
                    }
                    if let Some(allowed) = &spec.allowed_values {
                        let as_str = value.as_str().unwrap_or_default();
                        if !allowed.iter().any(|v| v == as_str) {
                            return Err(format!(
                                "field '{}' must be one of [{}]",
                                name,
                                allowed.join(", ")
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Instrumentation record emitted after every execution, success or failure.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub tool: String,
    pub duration: Duration,
    pub success: bool,
}

/// External collaborator that renders a human-readable execution status.
pub trait DisplaySink: Send + Sync {
    fn show_status(&self, status: &str);
}

/// Registry and execution harness for named async tools.
pub struct ToolExecutor {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    timeout: Duration,
    telemetry: Option<mpsc::Sender<ExecutionRecord>>,
    display: Option<Arc<dyn DisplaySink>>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TOOL_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            timeout,
            telemetry: None,
            display: None,
        }
    }

    pub fn with_telemetry(mut self, tx: mpsc::Sender<ExecutionRecord>) -> Self {
        self.telemetry = Some(tx);
        self
    }

    pub fn with_display(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.display = Some(sink);
        self
    }

    /// Registers a tool. A duplicate name overwrites the previous entry with
    /// a logged warning rather than an error.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        if tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Overwriting previously registered tool");
        } else {
            info!(tool = %name, "Registered tool");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Executes a registered tool: validates arguments against the declared
    /// schema, races the handler against the timeout, and emits telemetry.
    ///
    /// A handler that loses the timeout race is not cancelled; it runs to
    /// completion on its own task and its late result is discarded.
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        let started = Instant::now();

        let tool = {
            let tools = self.tools.read().expect("tool registry lock poisoned");
            tools.get(name).cloned()
        };
        let Some(tool) = tool else {
            let result = ToolResult::fail(
                crate::error::AgentError::ToolNotFound(name.to_string()).to_string(),
                elapsed_ms(started),
            );
            self.report(name, started, false).await;
            return result;
        };

        if let Err(reason) = tool.descriptor().schema.validate(&args) {
            let result = ToolResult::fail(
                crate::error::AgentError::InvalidArguments {
                    tool: name.to_string(),
                    reason,
                }
                .to_string(),
                elapsed_ms(started),
            );
            self.report(name, started, false).await;
            return result;
        }

        let handler = {
            let tool = tool.clone();
            tokio::spawn(async move { tool.execute(args).await })
        };

        let result = match tokio::time::timeout(self.timeout, handler).await {
            Ok(Ok(Ok(value))) => ToolResult::ok(value, elapsed_ms(started)),
            Ok(Ok(Err(err))) => ToolResult::fail(err.to_string(), elapsed_ms(started)),
            Ok(Err(join_err)) => {
                ToolResult::fail(format!("tool task failed: {}", join_err), elapsed_ms(started))
            }
            Err(_) => ToolResult::fail(
                crate::error::AgentError::Timeout {
                    what: format!("tool '{}'", name),
                    budget: self.timeout,
                }
                .to_string(),
                elapsed_ms(started),
            ),
        };

        self.report(name, started, result.success).await;
        result
    }

    async fn report(&self, tool: &str, started: Instant, success: bool) {
        let duration = started.elapsed();
        if let Some(tx) = &self.telemetry {
            let record = ExecutionRecord {
                tool: tool.to_string(),
                duration,
                success,
            };
            if tx.send(record).await.is_err() {
                warn!(tool, "Telemetry receiver dropped");
            }
        }
        if let Some(display) = &self.display {
            let status = if success {
                format!("{} completed in {}ms", tool, duration.as_millis())
            } else {
                format!("{} failed after {}ms", tool, duration.as_millis())
            };
            display.show_status(&status);
        }
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
