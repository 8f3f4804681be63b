use serde::{Deserialize, Serialize};

use crate::completion::ToolDefinition;
use crate::schema::{validate_schema, SchemaError};

/// An action a game lets the model perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

impl Action {
    /// Tool form of this action. Actions without parameters get an empty
    /// object schema.
    pub fn to_tool(&self) -> ToolDefinition {
        let parameters = match &self.schema {
            Some(schema) if schema.as_object().is_some_and(|m| !m.is_empty()) => schema.clone(),
            _ => serde_json::json!({ "type": "object", "properties": {} }),
        };
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RegistrationError {
    #[error("action '{0}' is already registered")]
    Duplicate(String),
    #[error("action '{name}' has an invalid schema: {source}")]
    InvalidActionSchema { name: String, source: SchemaError },
}

/// Outcome of one `actions/register` batch.
#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<RegistrationError>,
}

/// The live set of actions, in registration order. Names are unique.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: Vec<Action>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.name.as_str())
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Register a batch. Each entry is judged on its own: duplicates and
    /// entries with malformed schemas are skipped, the rest are accepted.
    pub fn register(&mut self, batch: Vec<Action>) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        for action in batch {
            if self.contains(&action.name) {
                report
                    .rejected
                    .push(RegistrationError::Duplicate(action.name));
                continue;
            }
            if let Some(schema) = &action.schema {
                if let Err(source) = validate_schema(schema) {
                    report.rejected.push(RegistrationError::InvalidActionSchema {
                        name: action.name,
                        source,
                    });
                    continue;
                }
            }
            report.accepted.push(action.name.clone());
            self.actions.push(action);
        }
        report
    }

    /// Remove every action named in `names`. Unknown names are ignored.
    /// Returns the names actually removed.
    pub fn unregister(&mut self, names: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        self.actions.retain(|a| {
            if names.contains(&a.name) {
                removed.push(a.name.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Tool definitions for the live set, optionally restricted to `filter`.
    pub fn tools(&self, filter: Option<&[String]>) -> Vec<ToolDefinition> {
        self.actions
            .iter()
            .filter(|a| filter.map_or(true, |names| names.contains(&a.name)))
            .map(Action::to_tool)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(name: &str) -> Action {
        Action {
            name: name.into(),
            description: format!("Do {}", name),
            schema: None,
        }
    }

    #[test]
    fn test_register_rejects_duplicates_without_affecting_batch() {
        let mut reg = ActionRegistry::new();
        reg.register(vec![action("jump")]);

        let report = reg.register(vec![action("jump"), action("crouch"), action("crouch")]);
        assert_eq!(report.accepted, vec!["crouch"]);
        assert_eq!(
            report.rejected,
            vec![
                RegistrationError::Duplicate("jump".into()),
                RegistrationError::Duplicate("crouch".into()),
            ]
        );
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["jump", "crouch"]);
    }

    #[test]
    fn test_register_rejects_invalid_schema_per_item() {
        let mut reg = ActionRegistry::new();
        let mut bad = action("aim");
        bad.schema = Some(json!({"type": "object", "properties": {"x": {"type": "vector"}}}));
        let mut good = action("shoot");
        good.schema = Some(json!({"type": "object", "properties": {"x": {"type": "number"}}}));

        let report = reg.register(vec![bad, good]);
        assert_eq!(report.accepted, vec!["shoot"]);
        assert!(matches!(
            &report.rejected[..],
            [RegistrationError::InvalidActionSchema { name, .. }] if name == "aim"
        ));
        assert!(!reg.contains("aim"));
    }

    #[test]
    fn test_unregister_ignores_unknown_names() {
        let mut reg = ActionRegistry::new();
        reg.register(vec![action("a"), action("b")]);
        let removed = reg.unregister(&["b".into(), "zzz".into()]);
        assert_eq!(removed, vec!["b"]);
        assert_eq!(reg.len(), 1);

        let removed = reg.unregister(&["zzz".into()]);
        assert!(removed.is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_tools_filter_and_empty_schema() {
        let mut reg = ActionRegistry::new();
        let mut with_schema = action("move");
        with_schema.schema = Some(json!({"type": "object", "properties": {"dir": {"type": "string"}}}));
        let mut empty = action("wait");
        empty.schema = Some(json!({}));
        reg.register(vec![action("jump"), with_schema, empty]);

        let all = reg.tools(None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].parameters, json!({"type": "object", "properties": {}}));
        assert_eq!(all[1].parameters["properties"]["dir"]["type"], "string");
        assert_eq!(all[2].parameters, json!({"type": "object", "properties": {}}));

        let only = reg.tools(Some(&["wait".to_string(), "jump".to_string()]));
        let names: Vec<_> = only.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["jump", "wait"]);
    }
}
