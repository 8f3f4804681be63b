//! Completion invocation: what is sent to the model and how its single
//! choice is turned into an [`Outcome`].

use async_trait::async_trait;

use crate::actions::ActionRegistry;
use crate::conversation::{ConversationStore, ConversationTurn, ToolCallRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub turns: Vec<ConversationTurn>,
    pub tools: Vec<ToolDefinition>,
    /// Set for forced actions: the model must answer with a tool call.
    pub require_tool: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub finish_reason: FinishReason,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// The completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// Everything that ends a session during an invocation.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum InvocationFailure {
    #[error("completion service error: {0}")]
    Service(#[from] CompletionError),
    #[error("expected exactly one choice, got {0}")]
    ChoiceCount(usize),
    #[error("model stopped without any text")]
    MissingContent,
    #[error("model selected a tool but returned no tool call")]
    MissingToolCall,
    #[error("unexpected finish reason: {0}")]
    UnexpectedFinishReason(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Natural stop with text.
    Text(String),
    /// The first tool call of the choice. `discarded` counts the ignored rest.
    ToolCall {
        content: Option<String>,
        call: ToolCallRecord,
        discarded: usize,
    },
}

/// Build the request for the current conversation, exposing every live
/// action as a tool, or only those named in `filter`.
pub fn build_request(
    conversation: &dyn ConversationStore,
    actions: &ActionRegistry,
    filter: Option<&[String]>,
) -> CompletionRequest {
    CompletionRequest {
        turns: conversation.turns().to_vec(),
        tools: actions.tools(filter),
        require_tool: filter.is_some(),
    }
}

/// Interpret the result of one completion call.
pub fn interpret(
    result: Result<CompletionResponse, CompletionError>,
) -> Result<Outcome, InvocationFailure> {
    let response = result?;
    if response.choices.len() != 1 {
        return Err(InvocationFailure::ChoiceCount(response.choices.len()));
    }
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(InvocationFailure::ChoiceCount(0));
    };

    match choice.finish_reason {
        FinishReason::Stop => match choice.content {
            Some(text) if !text.trim().is_empty() => Ok(Outcome::Text(text)),
            _ => Err(InvocationFailure::MissingContent),
        },
        FinishReason::ToolCalls => {
            let mut calls = choice.tool_calls.into_iter();
            let call = calls.next().ok_or(InvocationFailure::MissingToolCall)?;
            Ok(Outcome::ToolCall {
                content: choice.content.filter(|c| !c.trim().is_empty()),
                call,
                discarded: calls.count(),
            })
        }
        FinishReason::Other(reason) => Err(InvocationFailure::UnexpectedFinishReason(reason)),
    }
}
