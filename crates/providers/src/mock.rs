//! Scripted test doubles for the provider traits.
//!
//! Useful in unit and integration tests where a real LLM or tool service is
//! either unavailable or irrelevant.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    GenerateRequest, Generation, ProviderError, TextGenerator, ToolCallRecord, ToolCatalog,
    ToolExecutor, ToolInvocation, ToolRecord, ToolResultRecord,
};

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// What `MockGenerator` does for one `generate` call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return the text without touching any tool.
    Text(String),
    /// Call each `(tool_id, input)` through the bound tools, then return `text`.
    CallTools {
        calls: Vec<(String, Value)>,
        text: String,
    },
    /// Fail the generation call.
    Fail(String),
}

/// A generator that records every request and answers from a FIFO script,
/// falling back to a default reply once the script is exhausted.
pub struct MockGenerator {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    /// All requests seen (in call order).
    pub requests: Arc<Mutex<Vec<GenerateRequest>>>,
}

impl MockGenerator {
    /// Always answer `"Mock response"`.
    pub fn new() -> Self {
        Self::returning("Mock response")
    }

    /// Always answer with the given text.
    pub fn returning(text: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: MockReply::Text(text.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always fail with the given message.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: MockReply::Fail(msg.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer from `replies` in order, then `"Mock response"`.
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        let mock = Self::new();
        *mock.replies.lock().unwrap() = replies.into();
        mock
    }

    /// Number of `generate` calls received.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Prompts of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            MockReply::Text(text) => Ok(Generation {
                text,
                ..Generation::default()
            }),
            MockReply::Fail(msg) => Err(ProviderError::Generation(msg)),
            MockReply::CallTools { calls, text } => {
                let mut generation = Generation {
                    text,
                    ..Generation::default()
                };
                for (n, (tool_id, input)) in calls.into_iter().enumerate() {
                    let tool = request
                        .find_tool(&tool_id)
                        .ok_or_else(|| ProviderError::ToolNotFound(tool_id.clone()))?;
                    let call_id = format!("call_{n}");
                    generation.tool_calls.push(ToolCallRecord {
                        call_id: call_id.clone(),
                        tool_id: tool_id.clone(),
                        input: input.clone(),
                    });
                    let output = tool.call(input).await?;
                    generation.tool_results.push(ToolResultRecord {
                        call_id,
                        tool_id,
                        output,
                    });
                }
                Ok(generation)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockToolService
// ---------------------------------------------------------------------------

/// A tool service double implementing both [`ToolCatalog`] and [`ToolExecutor`].
///
/// Tools registered with [`MockToolService::appearing_after_refresh`] only show
/// up once a forced refresh happened, which lets tests observe the
/// refresh-on-miss path.
pub struct MockToolService {
    tools: Mutex<Vec<ToolRecord>>,
    pending: Mutex<Vec<ToolRecord>>,
    responses: HashMap<String, Result<Value, String>>,
    /// `force_refresh` flag of every catalog read.
    pub catalog_reads: Arc<Mutex<Vec<bool>>>,
    /// All tool invocations seen (in call order).
    pub invocations: Arc<Mutex<Vec<ToolInvocation>>>,
}

impl MockToolService {
    pub fn new() -> Self {
        Self::with_tools(Vec::new())
    }

    pub fn with_tools(tools: Vec<ToolRecord>) -> Self {
        Self {
            tools: Mutex::new(tools),
            pending: Mutex::new(Vec::new()),
            responses: HashMap::new(),
            catalog_reads: Arc::new(Mutex::new(Vec::new())),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tools that only become visible after a forced refresh.
    pub fn appearing_after_refresh(self, tools: Vec<ToolRecord>) -> Self {
        *self.pending.lock().unwrap() = tools;
        self
    }

    /// Make `tool_id` return `output`.
    pub fn responding(mut self, tool_id: impl Into<String>, output: Value) -> Self {
        self.responses.insert(tool_id.into(), Ok(output));
        self
    }

    /// Make `tool_id` fail with `msg`.
    pub fn failing(mut self, tool_id: impl Into<String>, msg: impl Into<String>) -> Self {
        self.responses.insert(tool_id.into(), Err(msg.into()));
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn refresh_count(&self) -> usize {
        self.catalog_reads
            .lock()
            .unwrap()
            .iter()
            .filter(|forced| **forced)
            .count()
    }
}

impl Default for MockToolService {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience constructor for a tool record in tests.
pub fn tool_record(id: &str, version: &str) -> ToolRecord {
    ToolRecord {
        id: id.to_string(),
        name: id.to_string(),
        description: format!("{id} tool"),
        input_schema: json!({ "type": "object" }),
        version: version.to_string(),
    }
}

#[async_trait]
impl ToolCatalog for MockToolService {
    async fn cached_tools(&self, force_refresh: bool) -> Result<Vec<ToolRecord>, ProviderError> {
        self.catalog_reads.lock().unwrap().push(force_refresh);

        let mut tools = self.tools.lock().unwrap();
        if force_refresh {
            let pending = std::mem::take(&mut *self.pending.lock().unwrap());
            tools.extend(pending);
        }
        Ok(tools.clone())
    }
}

#[async_trait]
impl ToolExecutor for MockToolService {
    async fn run_tool(&self, invocation: ToolInvocation) -> Result<Value, ProviderError> {
        self.invocations.lock().unwrap().push(invocation.clone());

        match self.responses.get(&invocation.id) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(msg)) => Err(ProviderError::ToolExecution {
                tool_id: invocation.id,
                message: msg.clone(),
            }),
            None => Ok(json!({ "tool": invocation.id, "ok": true })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundTool;

    #[tokio::test]
    async fn scripted_replies_then_fallback() {
        let generator = MockGenerator::scripted(vec![MockReply::Text("first".into())]);

        let a = generator.generate(GenerateRequest::new("m", "p1")).await.unwrap();
        let b = generator.generate(GenerateRequest::new("m", "p2")).await.unwrap();

        assert_eq!(a.text, "first");
        assert_eq!(b.text, "Mock response");
        assert_eq!(generator.prompts(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn tool_calls_go_through_the_bound_executor() {
        let service = Arc::new(
            MockToolService::with_tools(vec![tool_record("search", "1")])
                .responding("search", json!({ "hits": 3 })),
        );
        let bound = BoundTool::new(tool_record("search", "1"), service.clone());
        let generator = MockGenerator::scripted(vec![MockReply::CallTools {
            calls: vec![("search".into(), json!({ "q": "rust" }))],
            text: "done".into(),
        }]);

        let generation = generator
            .generate(GenerateRequest::new("m", "p").with_tools(vec![bound]))
            .await
            .unwrap();

        assert_eq!(generation.text, "done");
        assert_eq!(generation.tool_results[0].output, json!({ "hits": 3 }));
        assert_eq!(service.invocation_count(), 1);
        assert_eq!(service.invocations.lock().unwrap()[0].version, "1");
    }

    #[tokio::test]
    async fn failing_tool_aborts_generation() {
        let service = Arc::new(MockToolService::new().failing("search", "boom"));
        let bound = BoundTool::new(tool_record("search", "1"), service.clone());
        let generator = MockGenerator::scripted(vec![MockReply::CallTools {
            calls: vec![("search".into(), json!({}))],
            text: "unreachable".into(),
        }]);

        let result = generator
            .generate(GenerateRequest::new("m", "p").with_tools(vec![bound]))
            .await;

        assert!(matches!(result, Err(ProviderError::ToolExecution { .. })));
    }

    #[tokio::test]
    async fn refresh_reveals_pending_tools() {
        let service = MockToolService::new().appearing_after_refresh(vec![tool_record("late", "2")]);

        assert!(service.cached_tools(false).await.unwrap().is_empty());
        assert_eq!(service.cached_tools(true).await.unwrap().len(), 1);
        assert_eq!(service.refresh_count(), 1);
    }
}
