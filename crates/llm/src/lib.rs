//! OpenAI-compatible chat client with tool calling.

use std::time::Duration;

use aish_config::LlmConfig;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Some providers send `"tool_calls": null` instead of omitting the field.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ToolCall>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCall>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of one tool call, paired with it through `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ── Model seam ───────────────────────────────────────────────────────────────

/// Anything that can answer a chat completion request.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// `tools` is the JSON array of function definitions offered to the
    /// model; an empty or null value sends none.
    async fn chat(&self, messages: &[ChatMessage], tools: &Value) -> Result<ChatMessage>;
}

// ── HTTP client ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        completions_url(&self.api_url)
    }

    /// Send a minimal request to check that the key is accepted.
    pub async fn test_api_key(&self) -> Result<()> {
        let payload = json!({
            "model": self.model,
            "messages": [ChatMessage::user("ping")],
            "max_tokens": 5,
        });
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("could not reach {}", self.api_url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        bail!("{}", describe_api_error(status.as_u16(), &body))
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn chat(&self, messages: &[ChatMessage], tools: &Value) -> Result<ChatMessage> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });
        if tools.as_array().is_some_and(|t| !t.is_empty()) {
            payload["tools"] = tools.clone();
        }

        debug!(model = %self.model, messages = messages.len(), "sending chat request");
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("could not reach {}", self.api_url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read chat response body")?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "chat request rejected");
            bail!("{}", describe_api_error(status.as_u16(), &body));
        }
        parse_completion(&body)
    }
}

fn completions_url(api_url: &str) -> String {
    format!("{}/chat/completions", api_url.trim_end_matches('/'))
}

/// Prefer the provider's `error.message` over the raw body.
fn describe_api_error(status: u16, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string));
    match message {
        Some(message) => format!("API error ({status}): {message}"),
        None if body.trim().is_empty() => format!("API error ({status})"),
        None => format!("API error ({status}): {}", body.trim()),
    }
}

fn parse_completion(body: &str) -> Result<ChatMessage> {
    let response: ChatResponse = serde_json::from_str(body)
        .with_context(|| format!("failed to parse chat response: {body}"))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .context("chat response contained no choices")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_handles_trailing_slash() {
        assert_eq!(
            completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://localhost:8080/v1"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn api_error_prefers_provider_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(
            describe_api_error(401, body),
            "API error (401): Incorrect API key provided"
        );
        assert_eq!(describe_api_error(502, "bad gateway\n"), "API error (502): bad gateway");
        assert_eq!(describe_api_error(500, ""), "API error (500)");
    }

    #[test]
    fn parses_tool_calls_from_completion() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "execute_shell", "arguments": "{\"command\":\"ls\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let message = parse_completion(body).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, None);
        assert_eq!(
            message.tool_calls,
            vec![ToolCall::new("call_abc", "execute_shell", r#"{"command":"ls"}"#)]
        );
    }

    #[test]
    fn null_tool_calls_and_empty_choices() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"done","tool_calls":null}}]}"#;
        let message = parse_completion(body).unwrap();
        assert_eq!(message.content.as_deref(), Some("done"));
        assert!(message.tool_calls.is_empty());

        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert!(err.to_string().contains("no choices"));
        assert!(parse_completion("not json").is_err());
    }

    #[test]
    fn messages_serialize_in_wire_shape() {
        let tool = serde_json::to_value(ChatMessage::tool_result("call_1", "ok")).unwrap();
        assert_eq!(tool, json!({"role": "tool", "content": "ok", "tool_call_id": "call_1"}));

        let user = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(user, json!({"role": "user", "content": "hi"}));

        let assistant = ChatMessage::assistant(None, vec![ToolCall::new("c", "fs_listdir", "{}")]);
        let value = serde_json::to_value(assistant).unwrap();
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["content"], Value::Null);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let config = LlmConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..LlmConfig::default()
        };
        let client = ChatClient::new(&config, "sk-test").unwrap();
        let err = client.chat(&[ChatMessage::user("hi")], &Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("could not reach"));
    }
}
