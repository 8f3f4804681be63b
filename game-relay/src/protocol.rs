//! Wire protocol spoken with game clients.
//!
//! Every frame is a JSON object whose `command` field selects the variant.
//! All inbound commands carry the `game` they originate from; the outbound
//! `action` command does not.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actions::Action;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("not a JSON object: {0}")]
    NotStructuredData(String),
    #[error("missing `command` field")]
    MissingDiscriminator,
    #[error("unknown command: {0}")]
    UnknownKind(String),
    #[error("malformed {kind} message: {details}")]
    SchemaViolation { kind: MessageKind, details: String },
}

/// The seven recognized values of the `command` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Startup,
    Context,
    RegisterActions,
    UnregisterActions,
    ForceAction,
    ActionResult,
    Action,
}

impl MessageKind {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "startup" => Some(Self::Startup),
            "context" => Some(Self::Context),
            "actions/register" => Some(Self::RegisterActions),
            "actions/unregister" => Some(Self::UnregisterActions),
            "actions/force" => Some(Self::ForceAction),
            "action/result" => Some(Self::ActionResult),
            "action" => Some(Self::Action),
            _ => None,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Context => "context",
            Self::RegisterActions => "actions/register",
            Self::UnregisterActions => "actions/unregister",
            Self::ForceAction => "actions/force",
            Self::ActionResult => "action/result",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Message {
    #[serde(rename = "startup")]
    Startup { game: String },
    #[serde(rename = "context")]
    Context { game: String, data: ContextData },
    #[serde(rename = "actions/register")]
    RegisterActions {
        game: String,
        data: RegisterActionsData,
    },
    #[serde(rename = "actions/unregister")]
    UnregisterActions {
        game: String,
        data: UnregisterActionsData,
    },
    #[serde(rename = "actions/force")]
    ForceAction { game: String, data: ForceActionData },
    #[serde(rename = "action/result")]
    ActionResult {
        game: String,
        data: ActionResultData,
    },
    /// Outbound only: an action the model chose, sent to every client.
    #[serde(rename = "action")]
    Action { data: ActionData },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Startup { .. } => MessageKind::Startup,
            Self::Context { .. } => MessageKind::Context,
            Self::RegisterActions { .. } => MessageKind::RegisterActions,
            Self::UnregisterActions { .. } => MessageKind::UnregisterActions,
            Self::ForceAction { .. } => MessageKind::ForceAction,
            Self::ActionResult { .. } => MessageKind::ActionResult,
            Self::Action { .. } => MessageKind::Action,
        }
    }
}

// ── Payloads ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextData {
    pub message: String,
    pub silent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterActionsData {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregisterActionsData {
    pub action_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceActionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub query: String,
    #[serde(default)]
    pub ephemeral_context: bool,
    pub action_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResultData {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    pub id: String,
    pub name: String,
    /// JSON-stringified arguments, as produced by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Parse one inbound text frame.
pub fn decode(text: &str) -> Result<Message, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::NotStructuredData(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::NotStructuredData(format!(
            "expected an object, got {}",
            value
        )));
    }

    let command = value
        .get("command")
        .ok_or(DecodeError::MissingDiscriminator)?;
    let command = command
        .as_str()
        .ok_or_else(|| DecodeError::UnknownKind(command.to_string()))?;
    let kind = MessageKind::from_command(command)
        .ok_or_else(|| DecodeError::UnknownKind(command.to_string()))?;

    serde_json::from_value(value).map_err(|e| DecodeError::SchemaViolation {
        kind,
        details: e.to_string(),
    })
}

/// Serialize a message to its wire form.
pub fn encode(msg: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_startup() {
        let msg = decode(r#"{"command":"startup","game":"Zomboid"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Startup {
                game: "Zomboid".into()
            }
        );
        assert_eq!(msg.kind(), MessageKind::Startup);
    }

    #[test]
    fn test_decode_register_with_optional_schema() {
        let msg = decode(
            r#"{"command":"actions/register","game":"g","data":{"actions":[
                {"name":"jump","description":"Jump once"},
                {"name":"move","description":"Walk","schema":{"type":"object","properties":{"dir":{"type":"string"}}}}
            ]}}"#,
        )
        .unwrap();
        let Message::RegisterActions { data, .. } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(data.actions.len(), 2);
        assert!(data.actions[0].schema.is_none());
        assert!(data.actions[1].schema.is_some());
    }

    #[test]
    fn test_decode_force_defaults_ephemeral_context() {
        let msg = decode(
            r#"{"command":"actions/force","game":"g","data":{"query":"Pick one","action_names":["a","b"]}}"#,
        )
        .unwrap();
        let Message::ForceAction { data, .. } = msg else {
            panic!("wrong variant");
        };
        assert!(!data.ephemeral_context);
        assert_eq!(data.state, None);
        assert_eq!(data.action_names, vec!["a", "b"]);
    }

    #[test]
    fn test_decode_not_json() {
        assert!(matches!(
            decode("Ping {}"),
            Err(DecodeError::NotStructuredData(_))
        ));
        assert!(matches!(
            decode("[1, 2]"),
            Err(DecodeError::NotStructuredData(_))
        ));
    }

    #[test]
    fn test_decode_missing_command() {
        assert_eq!(
            decode(r#"{"game":"g"}"#),
            Err(DecodeError::MissingDiscriminator)
        );
    }

    #[test]
    fn test_decode_unknown_command() {
        assert_eq!(
            decode(r#"{"command":"shutdown/graceful","game":"g"}"#),
            Err(DecodeError::UnknownKind("shutdown/graceful".into()))
        );
        assert!(matches!(
            decode(r#"{"command":7}"#),
            Err(DecodeError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_decode_schema_violation_names_kind() {
        let err = decode(r#"{"command":"context","game":"g","data":{"message":"hi"}}"#)
            .unwrap_err();
        match err {
            DecodeError::SchemaViolation { kind, details } => {
                assert_eq!(kind, MessageKind::Context);
                assert!(details.contains("silent"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_encode_action_omits_game() {
        let msg = Message::Action {
            data: ActionData {
                id: "abc".into(),
                name: "jump".into(),
                data: Some(r#"{"height":2}"#.into()),
            },
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(value["command"], "action");
        assert_eq!(value["data"]["id"], "abc");
        assert_eq!(value["data"]["data"], r#"{"height":2}"#);
        assert!(value.get("game").is_none());
    }
}
