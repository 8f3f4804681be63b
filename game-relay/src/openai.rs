//! [`CompletionClient`] for OpenAI-compatible `POST /chat/completions`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::completion::{
    Choice, CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
    FinishReason, ToolDefinition,
};
use crate::conversation::{ConversationTurn, ToolCallRecord};

pub struct OpenAiClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let body = ChatRequest::new(&self.model, &request);
        tracing::debug!(
            "→ chat/completions ({} messages, {} tools)",
            body.messages.len(),
            body.tools.len()
        );

        let res = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat = res
            .json::<ChatResponse>()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
        Ok(chat.into())
    }
}

// ── Request wire types ──

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, request: &CompletionRequest) -> Self {
        let tools: Vec<ChatTool> = request.tools.iter().map(ChatTool::from).collect();
        let tool_choice = (request.require_tool && !tools.is_empty()).then_some("required");
        Self {
            model,
            messages: request.turns.iter().map(ChatMessage::from).collect(),
            tools,
            tool_choice,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        let (role, content, tool_calls, tool_call_id) = match turn {
            ConversationTurn::System { content } => ("system", Some(content.clone()), vec![], None),
            ConversationTurn::User { content } => ("user", Some(content.clone()), vec![], None),
            ConversationTurn::Assistant { content, tool_call } => (
                "assistant",
                content.clone(),
                tool_call.iter().map(ChatToolCall::from).collect(),
                None,
            ),
            ConversationTurn::ToolResult {
                tool_call_id,
                content,
            } => ("tool", Some(content.clone()), vec![], Some(tool_call_id.clone())),
        };
        Self {
            role,
            content,
            tool_calls,
            tool_call_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatToolFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolDefinition> for ChatTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ChatFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl From<&ToolCallRecord> for ChatToolCall {
    fn from(call: &ToolCallRecord) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: ChatFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

// ── Response wire types ──

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    finish_reason: Option<String>,
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        // `function_call` is the legacy name for the same thing.
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some(other) => FinishReason::Other(other.to_string()),
        None => FinishReason::Other("none".into()),
    }
}

impl From<ChatResponse> for CompletionResponse {
    fn from(res: ChatResponse) -> Self {
        let choices = res
            .choices
            .unwrap_or_default()
            .into_iter()
            .map(|c| Choice {
                finish_reason: finish_reason(c.finish_reason.as_deref()),
                content: c.message.content,
                tool_calls: c
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|t| ToolCallRecord {
                        id: t.id,
                        name: t.function.name,
                        arguments: t.function.arguments,
                    })
                    .collect(),
            })
            .collect();
        CompletionResponse { choices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(require_tool: bool) -> CompletionRequest {
        CompletionRequest {
            turns: vec![
                ConversationTurn::system("rules"),
                ConversationTurn::user("a zombie"),
                ConversationTurn::Assistant {
                    content: None,
                    tool_call: Some(ToolCallRecord {
                        id: "call_1".into(),
                        name: "run".into(),
                        arguments: r#"{"speed":3}"#.into(),
                    }),
                },
                ConversationTurn::ToolResult {
                    tool_call_id: "call_1".into(),
                    content: "Action 'run' succeeded".into(),
                },
            ],
            tools: vec![ToolDefinition {
                name: "run".into(),
                description: "Run away".into(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
            require_tool,
        }
    }

    #[test]
    fn test_request_serialization() {
        let body = serde_json::to_value(ChatRequest::new("gpt-test", &request(false))).unwrap();
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "a zombie");

        let assistant = &body["messages"][2];
        assert_eq!(assistant["role"], "assistant");
        assert!(assistant["content"].is_null());
        assert_eq!(assistant["tool_calls"][0]["id"], "call_1");
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], r#"{"speed":3}"#);

        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "run");
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_required_tool_choice() {
        let body = serde_json::to_value(ChatRequest::new("m", &request(true))).unwrap();
        assert_eq!(body["tool_choice"], "required");

        let mut no_tools = request(true);
        no_tools.tools.clear();
        let body = serde_json::to_value(ChatRequest::new("m", &no_tools)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_response_with_tool_call() {
        let raw = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "hide", "arguments": "{}" }
                    }]
                }
            }]
        });
        let res: CompletionResponse = serde_json::from_value::<ChatResponse>(raw).unwrap().into();
        assert_eq!(res.choices.len(), 1);
        assert_eq!(res.choices[0].finish_reason, FinishReason::ToolCalls);
        assert_eq!(res.choices[0].content, None);
        assert_eq!(res.choices[0].tool_calls[0].id, "call_9");
        assert_eq!(res.choices[0].tool_calls[0].name, "hide");
    }

    #[test]
    fn test_response_with_text_and_null_tool_calls() {
        let raw = json!({
            "choices": [{
                "finish_reason": "stop",
                "message": { "role": "assistant", "content": "Hi!", "tool_calls": null }
            }]
        });
        let res: CompletionResponse = serde_json::from_value::<ChatResponse>(raw).unwrap().into();
        assert_eq!(res.choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(res.choices[0].content.as_deref(), Some("Hi!"));
        assert!(res.choices[0].tool_calls.is_empty());
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(finish_reason(Some("function_call")), FinishReason::ToolCalls);
        assert_eq!(
            finish_reason(Some("length")),
            FinishReason::Other("length".into())
        );
        assert_eq!(finish_reason(None), FinishReason::Other("none".into()));
    }
}
