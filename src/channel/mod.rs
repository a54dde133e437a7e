//! Upstream channels: one configured provider account each.
//!
//! | Type | Role |
//! |------|------|
//! | [`Channel`] | outbound transformer, optional executor, model rules |
//! | [`ModelMapper`] | From→To model rewriting |
//! | [`ChannelRegistry`] | atomically swapped snapshot of live channels |
//! | [`ChannelSelector`] | candidate channels for one request |

pub mod mapper;
pub mod registry;
pub mod selector;

pub use mapper::ModelMapper;
pub use registry::{ChannelRegistry, ChannelSource, FileChannelSource, StaticChannelSource};
pub use selector::{ChannelSelector, ModelChannelSelector};

use crate::config::{ChannelConfig, ChannelKind, ModelMapping};
use crate::error::ErrorContext;
use crate::transformer::anthropic::AnthropicOutbound;
use crate::transformer::bedrock::{AwsCredentials, BedrockExecutor, BedrockOutbound, SigV4Signer};
use crate::transformer::openai::OpenAiOutbound;
use crate::transformer::Outbound;
use crate::transport::{Executor, HttpExecutor};
use crate::{Error, Result};
use std::sync::Arc;

pub struct Channel {
    pub id: String,
    pub name: String,
    pub outbound: Arc<dyn Outbound>,
    /// Replaces the pipeline's default executor when set.
    pub executor: Option<Arc<dyn Executor>>,
    /// Empty means any model.
    pub supported_models: Vec<String>,
    pub mapper: ModelMapper,
    pub priority: i32,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_format", &self.outbound.api_format())
            .field("custom_executor", &self.executor.is_some())
            .field("supported_models", &self.supported_models)
            .field("mappings", &self.mapper.rules())
            .field("priority", &self.priority)
            .finish()
    }
}

impl Channel {
    pub fn new(id: impl Into<String>, outbound: Arc<dyn Outbound>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            outbound,
            executor: None,
            supported_models: Vec::new(),
            mapper: ModelMapper::default(),
            priority: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_supported_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mappings(mut self, mappings: Vec<ModelMapping>) -> Self {
        self.mapper = ModelMapper::new(mappings);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// A channel serves `model` if it lists it, maps it, or lists nothing.
    pub fn supports(&self, model: &str) -> bool {
        self.supported_models.is_empty()
            || self.supported_models.iter().any(|m| m == model)
            || self.mapper.lookup(model).is_some()
    }

    pub fn map_model(&self, model: &str) -> String {
        self.mapper.map(model)
    }

    /// Build a live channel. Bedrock channels get a signing executor sharing
    /// `http`'s connection pool; the others use the pipeline default.
    pub fn from_config(config: &ChannelConfig, http: &HttpExecutor) -> Result<Self> {
        let base_url = config.base_url.as_deref();
        let mut channel = match config.kind {
            ChannelKind::OpenAi => Channel::new(
                config.id.clone(),
                Arc::new(OpenAiOutbound::new(base_url, config.api_key.clone())),
            ),
            ChannelKind::Anthropic => Channel::new(
                config.id.clone(),
                Arc::new(AnthropicOutbound::new(base_url, config.api_key.clone())),
            ),
            ChannelKind::Bedrock => {
                let bedrock = config.bedrock.as_ref().ok_or_else(|| {
                    Error::configuration_with_context(
                        format!("channel {} has no bedrock section", config.id),
                        ErrorContext::new().with_field_path("bedrock"),
                    )
                })?;
                let signer = SigV4Signer::new(
                    AwsCredentials {
                        access_key_id: bedrock.access_key_id.clone(),
                        secret_access_key: bedrock.secret_access_key.clone(),
                        session_token: bedrock.session_token.clone(),
                    },
                    bedrock.region.clone(),
                );
                Channel::new(
                    config.id.clone(),
                    Arc::new(BedrockOutbound::new(base_url, &bedrock.region)),
                )
                .with_executor(Arc::new(BedrockExecutor::new(http.clone(), signer)))
            }
        };
        if !config.name.is_empty() {
            channel.name = config.name.clone();
        }
        Ok(channel
            .with_supported_models(config.supported_models.iter().cloned())
            .with_mappings(config.model_mappings.clone())
            .with_priority(config.priority))
    }
}
