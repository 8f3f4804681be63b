//! Session state machine.
//!
//! The session owns everything that changes in response to game messages:
//! the game identity, the registered actions, the conversation, the queue of
//! deferred messages and the lifecycle state. It never talks to the network
//! itself. Handling a message may yield a [`CompletionRequest`]; the caller
//! runs it and feeds the result back through [`Session::on_completion`]. The
//! state machine guarantees at most one request is outstanding.

use std::mem;

use crate::actions::{Action, ActionRegistry};
use crate::completion::{self, CompletionError, CompletionRequest, CompletionResponse, Outcome};
use crate::conversation::{ConversationLog, ConversationStore, ConversationTurn};
use crate::protocol::{
    ActionData, ActionResultData, ContextData, ForceActionData, Message, MessageKind,
};
use crate::queue::PendingQueue;

/// Fan-out of outbound messages to every connected client.
///
/// Best effort: failures on individual connections are reported by the
/// implementation and never surface here.
pub trait Broadcaster: Send {
    fn broadcast(&self, message: &Message);
}

/// The action the model chose and the games were told to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: String,
    pub action_name: String,
}

/// The force request behind an outstanding forced action, kept for retries.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcedActionContext {
    pub state: Option<String>,
    pub query: String,
    pub ephemeral_context: bool,
    pub candidates: Vec<String>,
}

impl From<ForceActionData> for ForcedActionContext {
    fn from(data: ForceActionData) -> Self {
        let mut candidates: Vec<String> = Vec::with_capacity(data.action_names.len());
        for name in data.action_names {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }
        Self {
            state: data.state,
            query: data.query,
            ephemeral_context: data.ephemeral_context,
            candidates,
        }
    }
}

impl ForcedActionContext {
    /// State followed by query.
    fn situation(&self) -> String {
        match &self.state {
            Some(state) => format!("{}\n\n{}", state, self.query),
            None => self.query.clone(),
        }
    }

    /// Trailing turn for requests made on behalf of an ephemeral force. It
    /// is never written to the conversation.
    fn ephemeral_turn(&self) -> Option<ConversationTurn> {
        self.ephemeral_context
            .then(|| ConversationTurn::user(self.situation()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    AwaitingStartup,
    Idle,
    /// A completion request is outstanding. `forced` is set when it was
    /// triggered by a force.
    Thinking {
        forced: Option<ForcedActionContext>,
    },
    PendingAction(PendingAction),
    PendingForcedAction {
        action: PendingAction,
        forced: ForcedActionContext,
    },
    Exiting {
        reason: String,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingStartup => "awaiting-startup",
            Self::Idle => "idle",
            Self::Thinking { .. } => "thinking",
            Self::PendingAction(_) => "pending-action",
            Self::PendingForcedAction { .. } => "pending-forced-action",
            Self::Exiting { .. } => "exiting",
        }
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        match self {
            Self::PendingAction(action) | Self::PendingForcedAction { action, .. } => Some(action),
            _ => None,
        }
    }

    /// True while a forced action is being decided or performed.
    fn force_outstanding(&self) -> bool {
        matches!(
            self,
            Self::Thinking { forced: Some(_) } | Self::PendingForcedAction { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    /// Re-issue a forced action when its result reports failure.
    pub retry_failed_forced_actions: bool,
}

pub struct Session {
    game: Option<String>,
    actions: ActionRegistry,
    conversation: Box<dyn ConversationStore>,
    queue: PendingQueue,
    state: SessionState,
    /// An action result arrived since the last force.
    result_since_force: bool,
    options: SessionOptions,
    broadcaster: Box<dyn Broadcaster>,
}

impl Session {
    pub fn new(options: SessionOptions, broadcaster: Box<dyn Broadcaster>) -> Self {
        Self::with_store(options, Box::new(ConversationLog::new()), broadcaster)
    }

    pub fn with_store(
        options: SessionOptions,
        mut conversation: Box<dyn ConversationStore>,
        broadcaster: Box<dyn Broadcaster>,
    ) -> Self {
        if !conversation.is_empty() {
            tracing::info!("Continuing conversation of {} turns", conversation.len());
        }
        conversation.append(ConversationTurn::system(options.system_prompt.clone()));
        Self {
            game: None,
            actions: ActionRegistry::new(),
            conversation,
            queue: PendingQueue::new(),
            state: SessionState::AwaitingStartup,
            result_since_force: false,
            options,
            broadcaster,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn game(&self) -> Option<&str> {
        self.game.as_deref()
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn conversation(&self) -> &[ConversationTurn] {
        self.conversation.turns()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn exit_reason(&self) -> Option<&str> {
        match &self.state {
            SessionState::Exiting { reason } => Some(reason),
            _ => None,
        }
    }

    // ── Inbound ──

    /// Handle one decoded message, either now or by queueing it.
    pub fn receive(&mut self, message: Message) -> Option<CompletionRequest> {
        let kind = message.kind();
        match &self.state {
            SessionState::Exiting { .. } => {
                tracing::debug!("Session exiting, ignoring {}", kind);
                None
            }
            SessionState::AwaitingStartup => {
                if kind == MessageKind::Startup {
                    self.apply(message)
                } else {
                    tracing::error!("Protocol error: {} received before startup, ignoring", kind);
                    None
                }
            }
            SessionState::Idle => self.apply(message),
            busy => {
                let immediate = match kind {
                    MessageKind::RegisterActions | MessageKind::UnregisterActions => true,
                    MessageKind::ActionResult => busy.pending().is_some(),
                    _ => false,
                };
                if immediate {
                    self.apply(message)
                } else if kind == MessageKind::ForceAction && busy.force_outstanding() {
                    tracing::error!(
                        "Protocol error: actions/force while another forced action is outstanding, ignoring"
                    );
                    None
                } else {
                    tracing::debug!(
                        "Queueing {} while {} ({} already queued)",
                        kind,
                        busy.name(),
                        self.queue.len()
                    );
                    self.queue.push(message);
                    None
                }
            }
        }
    }

    /// Feed back the result of the outstanding completion request.
    pub fn on_completion(
        &mut self,
        result: Result<CompletionResponse, CompletionError>,
    ) -> Option<CompletionRequest> {
        let forced = match &mut self.state {
            SessionState::Thinking { forced } => forced.take(),
            other => {
                tracing::warn!("Completion result arrived while {}, ignoring", other.name());
                return None;
            }
        };

        match completion::interpret(result) {
            Err(failure) => {
                self.exit(failure.to_string());
                None
            }
            Ok(Outcome::Text(text)) => {
                tracing::info!("Model: {}", text);
                self.conversation.append(ConversationTurn::Assistant {
                    content: Some(text),
                    tool_call: None,
                });
                self.transition(SessionState::Idle);
                self.drain()
            }
            Ok(Outcome::ToolCall {
                content,
                call,
                discarded,
            }) => {
                if discarded > 0 {
                    tracing::warn!(
                        "Model returned {} extra tool call(s), only '{}' is sent",
                        discarded,
                        call.name
                    );
                }
                if !self.actions.contains(&call.name) {
                    tracing::warn!("Model chose unregistered action '{}'", call.name);
                }

                let action = PendingAction {
                    id: call.id.clone(),
                    action_name: call.name.clone(),
                };
                let data = (!call.arguments.trim().is_empty()).then(|| call.arguments.clone());
                self.broadcaster.broadcast(&Message::Action {
                    data: ActionData {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        data,
                    },
                });
                self.conversation.append(ConversationTurn::Assistant {
                    content,
                    tool_call: Some(call),
                });

                let next = match forced {
                    Some(forced) => SessionState::PendingForcedAction { action, forced },
                    None => SessionState::PendingAction(action),
                };
                self.transition(next);
                None
            }
        }
    }

    /// Proactive invocation while nothing else is going on.
    pub fn think(&mut self) -> Option<CompletionRequest> {
        if self.state != SessionState::Idle || !self.queue.is_empty() {
            return None;
        }
        tracing::debug!("Idle, thinking unprompted");
        self.begin_thinking(None)
    }

    // ── Transition rules ──

    fn apply(&mut self, message: Message) -> Option<CompletionRequest> {
        match message {
            Message::Startup { game } => self.start_game(game),
            Message::Context { data, .. } => self.add_context(data),
            Message::RegisterActions { data, .. } => {
                self.register_actions(data.actions);
                None
            }
            Message::UnregisterActions { data, .. } => {
                self.unregister_actions(&data.action_names);
                None
            }
            Message::ForceAction { data, .. } => self.force_action(data.into()),
            Message::ActionResult { data, .. } => self.action_result(data),
            Message::Action { data } => {
                tracing::error!(
                    "Protocol error: clients may not send `action` (id {}), ignoring",
                    data.id
                );
                None
            }
        }
    }

    fn start_game(&mut self, game: String) -> Option<CompletionRequest> {
        if let Some(pending) = self.state.pending() {
            tracing::info!(
                "Startup discards pending action '{}' ({})",
                pending.action_name,
                pending.id
            );
        }
        tracing::info!("Game started: {}", game);
        self.actions.clear();
        self.result_since_force = false;
        self.conversation
            .append(ConversationTurn::user(format!("A new game has started: {}", game)));
        self.game = Some(game);
        self.transition(SessionState::Idle);
        self.begin_thinking(None)
    }

    fn add_context(&mut self, data: ContextData) -> Option<CompletionRequest> {
        if let Some(pending) = self.state.pending() {
            tracing::error!(
                "Ordering violation: context while action {} is pending, ignoring",
                pending.id
            );
            return None;
        }
        self.conversation.append(ConversationTurn::user(data.message));
        if data.silent {
            None
        } else {
            self.begin_thinking(None)
        }
    }

    fn register_actions(&mut self, batch: Vec<Action>) {
        let report = self.actions.register(batch);
        for err in &report.rejected {
            tracing::warn!("Registration skipped: {}", err);
        }
        tracing::info!(
            "Registered {} action(s), skipped {}, {} live",
            report.accepted.len(),
            report.rejected.len(),
            self.actions.len()
        );
        tracing::debug!("Live actions: {:?}", self.actions.names().collect::<Vec<_>>());
    }

    fn unregister_actions(&mut self, names: &[String]) {
        let removed = self.actions.unregister(names);
        tracing::info!(
            "Unregistered {} action(s), {} live",
            removed.len(),
            self.actions.len()
        );
    }

    fn force_action(&mut self, forced: ForcedActionContext) -> Option<CompletionRequest> {
        let unknown: Vec<&str> = forced
            .candidates
            .iter()
            .filter(|name| !self.actions.contains(name))
            .map(String::as_str)
            .collect();
        if unknown.len() == forced.candidates.len() {
            tracing::error!(
                "Protocol error: actions/force names no registered action ({:?}), ignoring",
                forced.candidates
            );
            return None;
        }
        if !unknown.is_empty() {
            tracing::warn!("actions/force names unregistered action(s): {:?}", unknown);
        }

        let prompt = self.force_prompt(&forced);
        self.result_since_force = false;
        self.conversation.append(ConversationTurn::user(prompt));
        self.begin_thinking(Some(forced))
    }

    /// The turn a force leaves in the conversation. State and query are
    /// kept only when no action result came in since the previous force;
    /// ephemeral ones travel with the request instead.
    fn force_prompt(&self, forced: &ForcedActionContext) -> String {
        let directive = format!(
            "You must use one of the following actions: {}",
            forced.candidates.join(", ")
        );
        if forced.ephemeral_context || self.result_since_force {
            directive
        } else {
            format!("{}\n\n{}", forced.situation(), directive)
        }
    }

    fn action_result(&mut self, data: ActionResultData) -> Option<CompletionRequest> {
        let Some(pending) = self.state.pending().cloned() else {
            tracing::error!(
                "Ordering violation: result for {} with no pending action, ignoring",
                data.id
            );
            return None;
        };
        if pending.id != data.id {
            tracing::error!(
                "Ordering violation: result for {} but {} is pending, ignoring",
                data.id,
                pending.id
            );
            return None;
        }

        let forced = match mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::PendingForcedAction { forced, .. } => Some(forced),
            _ => None,
        };
        self.result_since_force = true;

        let status = if data.success { "succeeded" } else { "failed" };
        let content = match &data.message {
            Some(message) => format!("Action '{}' {}: {}", pending.action_name, status, message),
            None => format!("Action '{}' {}", pending.action_name, status),
        };
        self.conversation.append(ConversationTurn::ToolResult {
            tool_call_id: pending.id,
            content,
        });

        let retry = match forced {
            Some(forced) if !data.success => {
                if self.options.retry_failed_forced_actions {
                    tracing::warn!("Forced action '{}' failed, retrying", pending.action_name);
                    Some(forced)
                } else {
                    tracing::warn!(
                        "Forced action '{}' failed; retry is disabled, continuing unrestricted",
                        pending.action_name
                    );
                    None
                }
            }
            _ => None,
        };

        match retry {
            Some(forced) => {
                let prompt = self.force_prompt(&forced);
                self.conversation.append(ConversationTurn::user(prompt));
                self.begin_thinking(Some(forced))
            }
            None => self.begin_thinking(None),
        }
    }

    // ── Internals ──

    fn begin_thinking(&mut self, forced: Option<ForcedActionContext>) -> Option<CompletionRequest> {
        let mut request = completion::build_request(
            self.conversation.as_ref(),
            &self.actions,
            forced.as_ref().map(|f| f.candidates.as_slice()),
        );
        if let Some(turn) = forced.as_ref().and_then(ForcedActionContext::ephemeral_turn) {
            request.turns.push(turn);
        }
        if self.actions.is_empty() {
            tracing::debug!("No actions registered, the model can only answer in text");
        }
        tracing::debug!(
            "Invoking with {} logged turns and {} tools",
            self.conversation.len(),
            request.tools.len()
        );
        self.transition(SessionState::Thinking { forced });
        Some(request)
    }

    /// Replay queued messages in arrival order while idle. Stops as soon as a
    /// message moves the session out of idle.
    fn drain(&mut self) -> Option<CompletionRequest> {
        while self.state == SessionState::Idle {
            let Some(queued) = self.queue.pop() else {
                break;
            };
            let waited = chrono::Utc::now() - queued.received_at;
            tracing::debug!(
                "Replaying {} queued {}ms ago ({} left)",
                queued.message.kind(),
                waited.num_milliseconds(),
                self.queue.len()
            );
            if let Some(request) = self.apply(queued.message) {
                return Some(request);
            }
        }
        None
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session {} -> {}", self.state.name(), next.name());
        self.state = next;
    }

    fn exit(&mut self, reason: String) {
        tracing::error!("Session exiting: {}", reason);
        self.transition(SessionState::Exiting { reason });
    }
}
