use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::conversation::Conversation;
use crate::error::Result;

/// A function the proposing agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn to_openai_format(&self) -> serde_json::Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// One tool invocation requested by the agent. `arguments` is the raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Parse an OpenAI-style `tool_calls[]` entry.
    pub fn from_openai_value(value: &serde_json::Value) -> Option<Self> {
        let function = value.get("function")?;
        Some(Self {
            id: value.get("id")?.as_str()?.to_string(),
            name: function.get("name")?.as_str()?.to_string(),
            arguments: function
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}")
                .to_string(),
        })
    }
}

/// A single response from the agent: free text, tool invocations, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTurn {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AgentTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Trimmed text, if any was sent.
    pub fn content(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// The proposing agent. Implementations talk to a model service; the
/// controller only ever sees this interface.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Produce the next agent turn for `conversation`. `tools` is `None`
    /// when a terminal textual answer is required.
    async fn complete(
        &self,
        conversation: &Conversation,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<AgentTurn>;
}
