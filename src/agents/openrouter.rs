use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::agents::conversation::{Conversation, Turn};
use crate::agents::model::{AgentTurn, CompletionModel, ToolCall, ToolDefinition};
use crate::config::ModelConfig;
use crate::error::{ForgeError, Result};

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// `CompletionModel` over an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenRouterClient {
    client: Client,
    config: ModelConfig,
    api_key: String,
    declared_tools: Vec<ToolDefinition>,
}

impl OpenRouterClient {
    /// Build a client reading the API key from the configured environment variable.
    pub fn from_env(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ForgeError::Config(format!("{} not set in environment", config.api_key_env)))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ForgeError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
            declared_tools: Vec::new(),
        })
    }

    /// Tools declared with `tool_choice: "none"` when a turn withholds tools
    /// but the history already holds tool calls.
    pub fn with_declared_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.declared_tools = tools;
        self
    }

    pub fn build_request(&self, conversation: &Conversation, tools: Option<&[ToolDefinition]>) -> Value {
        let messages: Vec<Value> = conversation.turns().iter().map(turn_to_message).collect();

        let mut request = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        match tools.filter(|t| !t.is_empty()) {
            Some(tools) => {
                request["tools"] = Value::Array(tools.iter().map(ToolDefinition::to_openai_format).collect());
                request["tool_choice"] = json!("auto");
            }
            None if !self.declared_tools.is_empty() && has_tool_history(conversation) => {
                request["tools"] = Value::Array(
                    self.declared_tools
                        .iter()
                        .map(ToolDefinition::to_openai_format)
                        .collect(),
                );
                request["tool_choice"] = json!("none");
            }
            None => {}
        }
        request
    }

    async fn send(&self, request: &Value) -> Result<Value> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut rate_limited = false;
        loop {
            let mut builder = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request);
            if let Some(referer) = &self.config.referer {
                builder = builder.header("HTTP-Referer", referer);
            }
            if let Some(title) = &self.config.app_title {
                builder = builder.header("X-Title", title);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status.is_success() {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| ForgeError::ModelService(format!("Invalid response body: {}", e)));
            }

            if status.as_u16() == 429 && !rate_limited {
                warn!("Model service rate limited, waiting...");
                rate_limited = true;
                sleep(RATE_LIMIT_BACKOFF).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::ModelService(format!(
                "API error {}: {}",
                status, body
            )));
        }
    }
}

fn has_tool_history(conversation: &Conversation) -> bool {
    conversation
        .turns()
        .iter()
        .any(|turn| matches!(turn, Turn::Agent(agent) if agent.has_tool_calls()))
}

#[async_trait]
impl CompletionModel for OpenRouterClient {
    async fn complete(
        &self,
        conversation: &Conversation,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<AgentTurn> {
        let request = self.build_request(conversation, tools);
        debug!(
            model = %self.config.model,
            message_count = conversation.len(),
            tools_offered = tools.is_some(),
            "Sending completion request"
        );

        let response = self.send(&request).await?;
        parse_response(&response)
    }
}

fn turn_to_message(turn: &Turn) -> Value {
    match turn {
        Turn::User { content } => json!({ "role": "user", "content": content }),
        Turn::Agent(agent) => {
            let mut message = json!({
                "role": "assistant",
                "content": agent.text.clone().map(Value::String).unwrap_or(Value::Null),
            });
            if !agent.tool_calls.is_empty() {
                message["tool_calls"] = agent
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": { "name": call.name, "arguments": call.arguments }
                        })
                    })
                    .collect();
            }
            message
        }
        Turn::ToolResult { call_id, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

fn parse_response(response: &Value) -> Result<AgentTurn> {
    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ForgeError::AgentProtocol("Empty response from model".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|value| {
                    let call = ToolCall::from_openai_value(value);
                    if call.is_none() {
                        warn!("Failed to parse tool call: {:?}", value);
                    }
                    call
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(AgentTurn { text, tool_calls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorTester;

    fn client() -> OpenRouterClient {
        OpenRouterClient::new(&ModelConfig::default(), "test-key").unwrap()
    }

    #[test]
    fn test_request_maps_turns_to_roles() {
        let mut conversation = Conversation::new("prompt", 3);
        conversation.push_agent(AgentTurn::tools(vec![ToolCall {
            id: "call_1".into(),
            name: "test_selector".into(),
            arguments: "{\"selector\":\"li\"}".into(),
        }]));
        conversation.push_tool_result("call_1", "{\"matchCount\":2,\"samples\":[]}");

        let request = client().build_request(&conversation, None);
        let messages = request["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert!(messages[1]["content"].is_null());
        assert_eq!(messages[1]["tool_calls"][0]["function"]["name"], "test_selector");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
        assert!(request.get("tools").is_none());
    }

    #[test]
    fn test_request_offers_tools_when_given() {
        let conversation = Conversation::new("prompt", 3);
        let tools = [SelectorTester::default().definition()];
        let request = client().build_request(&conversation, Some(&tools));
        assert_eq!(request["tool_choice"], "auto");
        assert_eq!(request["tools"][0]["function"]["name"], "test_selector");
        assert_eq!(request["max_tokens"], 4000);
    }

    #[test]
    fn test_withheld_tools_stay_declared_after_tool_calls() {
        let tools = vec![SelectorTester::default().definition()];
        let client = client().with_declared_tools(tools);

        let mut conversation = Conversation::new("prompt", 3);
        let request = client.build_request(&conversation, None);
        assert!(request.get("tools").is_none());

        conversation.push_agent(AgentTurn::tools(vec![ToolCall {
            id: "call_1".into(),
            name: "test_selector".into(),
            arguments: "{\"selector\":\"li\"}".into(),
        }]));
        conversation.push_tool_result("call_1", "{\"matchCount\":2,\"samples\":[]}");

        let request = client.build_request(&conversation, None);
        assert_eq!(request["tool_choice"], "none");
        assert_eq!(request["tools"][0]["function"]["name"], "test_selector");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Checking the list first.",
                    "tool_calls": [
                        { "id": "a", "type": "function", "function": { "name": "test_selector", "arguments": "{}" } },
                        { "bogus": true }
                    ]
                }
            }]
        });
        let turn = parse_response(&response).unwrap();
        assert_eq!(turn.text.as_deref(), Some("Checking the list first."));
        assert_eq!(turn.tool_calls.len(), 1);
    }

    #[test]
    fn test_missing_choices_is_protocol_error() {
        let err = parse_response(&json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, ForgeError::AgentProtocol(ref m) if m == "Empty response from model"));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = ModelConfig {
            api_key_env: "FEEDFORGE_TEST_UNSET_KEY".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(OpenRouterClient::from_env(&config), Err(ForgeError::Config(_))));
    }
}
