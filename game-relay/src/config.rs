//! Relay configuration, read from environment variables.

use std::time::Duration;

use crate::session::SessionOptions;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are playing a video game through a relay. Messages from the game arrive \
as user messages describing what is happening. You act in the game only by \
calling the provided tools, one at a time; after each call you will be told \
whether it succeeded. When you have nothing to do, reply with a short thought \
in plain text.";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub think_interval: Duration,
    pub system_prompt: String,
    pub retry_failed_forced_actions: bool,
    pub request_timeout: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let think_secs: u64 = parse_or(&lookup, "THINK_INTERVAL_SECS", 10)?;
        let timeout_secs: u64 = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 60)?;

        Ok(Self {
            host: lookup("RELAY_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: parse_or(&lookup, "RELAY_PORT", 8000)?,
            base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            api_key,
            model: lookup("RELAY_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            think_interval: clamp_think_interval(think_secs),
            system_prompt: lookup("RELAY_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            retry_failed_forced_actions: parse_flag(
                &lookup,
                "RETRY_FAILED_FORCED_ACTIONS",
            )?,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            system_prompt: self.system_prompt.clone(),
            retry_failed_forced_actions: self.retry_failed_forced_actions,
        }
    }
}

/// The proactive-think period never drops below one second.
pub fn clamp_think_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<bool, ConfigError> {
    match lookup(var) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.think_interval, Duration::from_secs(10));
        assert!(!cfg.retry_failed_forced_actions);
        assert_eq!(cfg.session_options().system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_missing_api_key() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::MissingApiKey);
        assert_eq!(
            config(&[("OPENAI_API_KEY", "")]).unwrap_err(),
            ConfigError::MissingApiKey
        );
    }

    #[test]
    fn test_think_interval_clamped() {
        let cfg = config(&[("OPENAI_API_KEY", "k"), ("THINK_INTERVAL_SECS", "0")]).unwrap();
        assert_eq!(cfg.think_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let cfg = config(&[
            ("OPENAI_API_KEY", "k"),
            ("RELAY_PORT", "9100"),
            ("RELAY_MODEL", "local-model"),
            ("RETRY_FAILED_FORCED_ACTIONS", "yes"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.model, "local-model");
        assert!(cfg.retry_failed_forced_actions);

        assert!(matches!(
            config(&[("OPENAI_API_KEY", "k"), ("RELAY_PORT", "http")]),
            Err(ConfigError::Invalid { var: "RELAY_PORT", .. })
        ));
        assert!(matches!(
            config(&[("OPENAI_API_KEY", "k"), ("RETRY_FAILED_FORCED_ACTIONS", "maybe")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
