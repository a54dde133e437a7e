use super::{Channel, ChannelRegistry};
use crate::types::Request;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Ordered failover candidates for one request.
#[async_trait]
pub trait ChannelSelector: Send + Sync {
    async fn select(&self, request: &Request) -> Result<Vec<Arc<Channel>>>;
}

/// Every snapshot channel serving the requested model, in snapshot order.
pub struct ModelChannelSelector {
    registry: Arc<ChannelRegistry>,
}

impl ModelChannelSelector {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ChannelSelector for ModelChannelSelector {
    async fn select(&self, request: &Request) -> Result<Vec<Arc<Channel>>> {
        let candidates: Vec<Arc<Channel>> = self
            .registry
            .snapshot()
            .iter()
            .filter(|c| c.supports(&request.model))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(Error::NoChannel {
                model: request.model.clone(),
            });
        }
        Ok(candidates)
    }
}
