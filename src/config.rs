//! Gateway configuration: a YAML document plus `AXONHUB_*` env overrides.
//!
//! ```yaml
//! retry:
//!   max_attempts: 3
//! request_timeout_secs: 120
//! channels:
//!   - id: openai-main
//!     name: OpenAI
//!     kind: openai
//!     api_key: sk-...
//!     supported_models: [gpt-4o]
//!     model_mappings:
//!       - { from: "gpt-4*", to: gpt-4o }
//! ```

use crate::error::ErrorContext;
use crate::transport::HttpExecutorConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_CHANNEL_REFRESH_SECS: u64 = 60;

/// Error-message substrings that make a failed attempt eligible for failover.
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "connection timeout",
    "rate limit exceeded",
    "temporary unavailable",
    "connection reset",
    "service unavailable",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retryable_errors() -> Vec<String> {
    DEFAULT_RETRYABLE_ERRORS.iter().map(|s| s.to_string()).collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[serde(alias = "open_ai")]
    OpenAi,
    Anthropic,
    Bedrock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMapping {
    pub from: String,
    pub to: String,
}

impl ModelMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BedrockConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl std::fmt::Debug for BedrockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub supported_models: Vec<String>,
    #[serde(default)]
    pub model_mappings: Vec<ModelMapping>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub bedrock: Option<BedrockConfig>,
}

fn default_enabled() -> bool {
    true
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("supported_models", &self.supported_models)
            .field("model_mappings", &self.model_mappings)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("bedrock", &self.bedrock)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpExecutorConfig,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_channel_refresh_secs")]
    pub channel_refresh_secs: u64,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_channel_refresh_secs() -> u64 {
    DEFAULT_CHANNEL_REFRESH_SECS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            http: HttpExecutorConfig::default(),
            request_timeout_secs: None,
            channel_refresh_secs: default_channel_refresh_secs(),
            channels: Vec::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        Error::configuration_with_context(
            format!("invalid value for {name}"),
            ErrorContext::new()
                .with_field_path(name)
                .with_details(e.to_string()),
        )
    })
}

impl GatewayConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                "invalid gateway config",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("yaml"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, then apply env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config {}", path.display()),
                ErrorContext::new().with_details(e.to_string()),
            )
        })?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AXONHUB_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("AXONHUB_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("AXONHUB_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = Some(parse_env("AXONHUB_REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("AXONHUB_HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = Some(parse_env("AXONHUB_HTTP_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("AXONHUB_CHANNEL_REFRESH_SECS") {
            self.channel_refresh_secs = parse_env("AXONHUB_CHANNEL_REFRESH_SECS", &v)?;
        }
        if let Some(v) = lookup("AXONHUB_PROXY_URL").filter(|v| !v.is_empty()) {
            self.http.proxy_url = Some(v);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be at least 1",
                ErrorContext::new().with_field_path("retry.max_attempts"),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for (i, channel) in self.channels.iter().enumerate() {
            if channel.id.is_empty() {
                return Err(Error::configuration_with_context(
                    "channel id must not be empty",
                    ErrorContext::new().with_field_path(format!("channels[{i}].id")),
                ));
            }
            if !seen.insert(channel.id.as_str()) {
                return Err(Error::configuration_with_context(
                    format!("duplicate channel id {}", channel.id),
                    ErrorContext::new().with_field_path(format!("channels[{i}].id")),
                ));
            }
            if channel.kind == ChannelKind::Bedrock && channel.bedrock.is_none() {
                return Err(Error::configuration_with_context(
                    "bedrock channel needs a bedrock section",
                    ErrorContext::new().with_field_path(format!("channels[{i}].bedrock")),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
request_timeout_secs: 30
channels:
  - id: a
    name: Primary
    kind: openai
    api_key: sk-a
    supported_models: [gpt-4]
    model_mappings:
      - { from: "gpt-*", to: upstream-x }
  - id: b
    kind: bedrock
    priority: 5
    bedrock:
      region: us-east-1
      access_key_id: AKID
      secret_access_key: secret
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let config = GatewayConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.channel_refresh_secs, 60);
        assert_eq!(config.request_timeout_secs, Some(30));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].kind, ChannelKind::OpenAi);
        assert_eq!(
            config.channels[0].model_mappings,
            vec![ModelMapping::new("gpt-*", "upstream-x")]
        );
        assert!(config.channels[1].enabled);
        assert_eq!(config.channels[1].priority, 5);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("AXONHUB_RETRY_MAX_ATTEMPTS", "5"),
            ("AXONHUB_HTTP_TIMEOUT_SECS", "15"),
            ("AXONHUB_PROXY_URL", "http://proxy:8080"),
        ]
        .into_iter()
        .collect();
        let mut config = GatewayConfig::default();
        config
            .apply_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.http.timeout_secs, Some(15));
        assert_eq!(config.http.proxy_url.as_deref(), Some("http://proxy:8080"));
    }

    #[test]
    fn bad_env_value_is_configuration_error() {
        let mut config = GatewayConfig::default();
        let err = config
            .apply_overrides_from(|k| (k == "AXONHUB_CHANNEL_REFRESH_SECS").then(|| "soon".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn bedrock_channel_requires_credentials() {
        let err = GatewayConfig::from_yaml_str("channels:\n  - id: x\n    kind: bedrock\n")
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("channels[0].bedrock")
        );
    }
}
