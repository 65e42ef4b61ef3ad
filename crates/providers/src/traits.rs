//! Collaborator contracts consumed by the engine.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::ProviderError;

// ---------------------------------------------------------------------------
// Tool catalog
// ---------------------------------------------------------------------------

/// An externally registered tool as published by the tool service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    /// External identifier, referenced by `ToolRef::id` in a step.
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema describing the tool's input object.
    #[serde(default)]
    pub input_schema: Value,
    pub version: String,
}

/// Read access to the (cached) list of registered tools.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Return the cached tool list.  `force_refresh` bypasses the cache and
    /// reloads it from the tool service first.
    async fn cached_tools(&self, force_refresh: bool) -> Result<Vec<ToolRecord>, ProviderError>;
}

// ---------------------------------------------------------------------------
// Tool execution
// ---------------------------------------------------------------------------

/// One call to the external tool-execution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub version: String,
    pub input: Value,
}

/// Runs tools on the external tool-execution service.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn run_tool(&self, invocation: ToolInvocation) -> Result<Value, ProviderError>;
}

/// A resolved tool handed to the generator as a callable function.
///
/// Calling it delegates to the tool service; a failing service surfaces as
/// `Err` so the generator aborts the generation call.
#[derive(Clone)]
pub struct BoundTool {
    pub record: ToolRecord,
    executor: Arc<dyn ToolExecutor>,
}

impl BoundTool {
    pub fn new(record: ToolRecord, executor: Arc<dyn ToolExecutor>) -> Self {
        Self { record, executor }
    }

    /// Function name the model sees.
    pub fn name(&self) -> &str {
        &self.record.id
    }

    /// Display name of the underlying tool.
    pub fn display_name(&self) -> &str {
        &self.record.name
    }

    pub async fn call(&self, input: Value) -> Result<Value, ProviderError> {
        debug!(tool_id = %self.record.id, version = %self.record.version, "invoking tool");
        self.executor
            .run_tool(ToolInvocation {
                id: self.record.id.clone(),
                version: self.record.version.clone(),
                input,
            })
            .await
    }
}

impl fmt::Debug for BoundTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTool")
            .field("id", &self.record.id)
            .field("version", &self.record.version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Text generation
// ---------------------------------------------------------------------------

/// How the model may use the bound tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// Input of a single generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub tools: Vec<BoundTool>,
    pub tool_choice: Option<ToolChoice>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<BoundTool>) -> Self {
        self.tool_choice = (!tools.is_empty()).then_some(ToolChoice::Auto);
        self.tools = tools;
        self
    }

    pub fn find_tool(&self, name: &str) -> Option<&BoundTool> {
        self.tools.iter().find(|t| t.name() == name)
    }
}

/// A tool call the model made during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_id: String,
    pub input: Value,
}

/// The result fed back to the model for a [`ToolCallRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultRecord {
    pub call_id: String,
    pub tool_id: String,
    pub output: Value,
}

/// Output of a generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
}

/// A text-generation provider.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Run one generation.  Bound tools are executed by the generator while
    /// the model asks for them; their failures abort the call.
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError>;
}
