//! The conversation sent to the completion service on every invocation.

/// A tool call the model made, as recorded in an assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationTurn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_call: Option<ToolCallRecord>,
    },
    /// Answer to the tool call with id `tool_call_id`.
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }
}

/// Storage for the conversation. Turns are only ever appended.
///
/// Implementations may decide what `turns` returns (for example a trimmed
/// or summarized window), the session only relies on append order.
pub trait ConversationStore: Send {
    fn append(&mut self, turn: ConversationTurn);
    fn turns(&self) -> &[ConversationTurn];

    fn len(&self) -> usize {
        self.turns().len()
    }

    fn is_empty(&self) -> bool {
        self.turns().is_empty()
    }
}

/// Unbounded in-memory log.
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for ConversationLog {
    fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }
}
