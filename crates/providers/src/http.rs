//! HTTP implementations of the provider traits.
//!
//! - [`HttpToolService`] talks to the tool-execution service's REST API and
//!   keeps the tool list in memory until a forced refresh.
//! - [`ChatCompletionsGenerator`] talks to any OpenAI-compatible
//!   `/chat/completions` endpoint and drives the tool-calling loop itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::{
    BoundTool, GenerateRequest, Generation, ProviderError, TextGenerator, ToolCallRecord,
    ToolCatalog, ToolChoice, ToolExecutor, ToolInvocation, ToolRecord, ToolResultRecord,
};

// ---------------------------------------------------------------------------
// Tool service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpToolServiceConfig {
    /// Base URL, e.g. `http://localhost:9000`.
    pub base_url: String,
    pub api_key: Option<String>,
}

/// REST client for the tool-execution service.
///
/// `GET  {base}/tools`          → `[ToolRecord]`
/// `POST {base}/tools/{id}/run` → `{ "output": …, "error": … }`
pub struct HttpToolService {
    client: reqwest::Client,
    config: HttpToolServiceConfig,
    cache: RwLock<Option<Vec<ToolRecord>>>,
}

#[derive(Debug, Serialize)]
struct RunToolBody<'a> {
    version: &'a str,
    input: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RunToolResponse {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
}

impl HttpToolService {
    pub fn new(config: HttpToolServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cache: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolRecord>, ProviderError> {
        let response = self
            .authorized(self.client.get(self.url("tools")))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "tool listing returned {status}: {body}"
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ToolCatalog for HttpToolService {
    async fn cached_tools(&self, force_refresh: bool) -> Result<Vec<ToolRecord>, ProviderError> {
        if !force_refresh {
            if let Some(tools) = self.cache.read().await.as_ref() {
                return Ok(tools.clone());
            }
        }

        let tools = self.fetch_tools().await?;
        info!(count = tools.len(), force_refresh, "tool cache refreshed");
        *self.cache.write().await = Some(tools.clone());
        Ok(tools)
    }
}

#[async_trait]
impl ToolExecutor for HttpToolService {
    async fn run_tool(&self, invocation: ToolInvocation) -> Result<Value, ProviderError> {
        let path = format!("tools/{}/run", invocation.id);
        let response = self
            .authorized(self.client.post(self.url(&path)))
            .json(&RunToolBody {
                version: &invocation.version,
                input: &invocation.input,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ToolExecution {
                tool_id: invocation.id,
                message: format!("{status}: {body}"),
            });
        }

        let parsed: RunToolResponse = response.json().await?;
        match parsed.error {
            Some(message) => Err(ProviderError::ToolExecution {
                tool_id: invocation.id,
                message,
            }),
            None => Ok(parsed.output),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat-completions generator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpGeneratorConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    /// Upper bound on model ↔ tool round trips within one generation.
    pub max_tool_rounds: usize,
}

impl Default for HttpGeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            max_tool_rounds: 8,
        }
    }
}

pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    config: HttpGeneratorConfig,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Value],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// Function definition offered to the model for a bound tool.
fn tool_definition(tool: &BoundTool) -> Value {
    let parameters = if tool.record.input_schema.is_object() {
        tool.record.input_schema.clone()
    } else {
        json!({ "type": "object", "properties": {} })
    };
    json!({
        "type": "function",
        "function": {
            "name": tool.name(),
            "description": tool.record.description,
            "parameters": parameters,
        }
    })
}

impl ChatCompletionsGenerator {
    pub fn new(config: HttpGeneratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn complete(
        &self,
        request: &GenerateRequest,
        messages: &[Value],
    ) -> Result<AssistantMessage, ProviderError> {
        let payload = ChatCompletionRequest {
            model: &request.model,
            messages,
            tools: request.tools.iter().map(tool_definition).collect(),
            tool_choice: if request.tools.is_empty() {
                None
            } else {
                request.tool_choice
            },
        };

        debug!(
            model = %request.model,
            messages = messages.len(),
            tools = payload.tools.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "chat completion failed");
            return Err(ProviderError::Generation(format!("API error ({status}): {body}")));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".into()))
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
        let mut messages = vec![json!({ "role": "user", "content": request.prompt })];
        let mut generation = Generation::default();

        for _ in 0..=self.config.max_tool_rounds {
            let message = self.complete(&request, &messages).await?;

            if message.tool_calls.is_empty() {
                generation.text = message.content.unwrap_or_default();
                return Ok(generation);
            }

            let calls = message.tool_calls.clone();
            messages.push(json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": calls,
            }));

            for call in calls {
                let tool = request
                    .find_tool(&call.function.name)
                    .ok_or_else(|| ProviderError::ToolNotFound(call.function.name.clone()))?;
                let input: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
                    ProviderError::InvalidResponse(format!(
                        "arguments for '{}' are not JSON: {e}",
                        call.function.name
                    ))
                })?;

                generation.tool_calls.push(ToolCallRecord {
                    call_id: call.id.clone(),
                    tool_id: call.function.name.clone(),
                    input: input.clone(),
                });

                let output = tool.call(input).await?;

                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output.to_string(),
                }));
                generation.tool_results.push(ToolResultRecord {
                    call_id: call.id,
                    tool_id: call.function.name,
                    output,
                });
            }
        }

        Err(ProviderError::Generation(format!(
            "model kept calling tools after {} rounds",
            self.config.max_tool_rounds
        )))
    }
}
