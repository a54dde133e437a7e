//! Hot-reloadable channel list.
//!
//! Readers take an `Arc` to an immutable snapshot; a refresh builds a new list
//! and swaps the pointer, so nobody ever observes a half-updated list.

use super::Channel;
use crate::config::GatewayConfig;
use crate::error::ErrorContext;
use crate::transport::HttpExecutor;
use crate::{Error, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type ChannelSnapshot = Arc<Vec<Arc<Channel>>>;

/// Where live channels come from; re-queried on every refresh.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Arc<Channel>>>;
}

/// A fixed list, mostly for embedding and tests.
pub struct StaticChannelSource {
    channels: Vec<Arc<Channel>>,
}

impl StaticChannelSource {
    pub fn new(channels: Vec<Arc<Channel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl ChannelSource for StaticChannelSource {
    async fn load(&self) -> Result<Vec<Arc<Channel>>> {
        Ok(self.channels.clone())
    }
}

/// Re-reads the `channels` section of a YAML gateway config.
pub struct FileChannelSource {
    path: PathBuf,
    http: HttpExecutor,
}

impl FileChannelSource {
    pub fn new(path: impl Into<PathBuf>, http: HttpExecutor) -> Self {
        Self {
            path: path.into(),
            http,
        }
    }
}

/// Live channels for every enabled entry of `config`.
pub fn channels_from_config(config: &GatewayConfig, http: &HttpExecutor) -> Result<Vec<Arc<Channel>>> {
    config
        .channels
        .iter()
        .filter(|c| c.enabled)
        .map(|c| Channel::from_config(c, http).map(Arc::new))
        .collect()
}

#[async_trait]
impl ChannelSource for FileChannelSource {
    async fn load(&self) -> Result<Vec<Arc<Channel>>> {
        let path = self.path.clone();
        let config = tokio::task::spawn_blocking(move || GatewayConfig::load(path))
            .await
            .map_err(|e| {
                Error::runtime_with_context(
                    "config reload task failed",
                    ErrorContext::new().with_details(e.to_string()),
                )
            })??;
        channels_from_config(&config, &self.http)
    }
}

pub struct ChannelRegistry {
    snapshot: ArcSwap<Vec<Arc<Channel>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn with_channels(channels: Vec<Arc<Channel>>) -> Self {
        let registry = Self::new();
        registry.replace(channels);
        registry
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.snapshot.load_full()
    }

    /// Highest priority first; ties keep their configured order.
    pub fn replace(&self, mut channels: Vec<Arc<Channel>>) {
        channels.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.snapshot.store(Arc::new(channels));
    }

    /// Pull a fresh list from `source` and swap it in. On error the current
    /// snapshot stays.
    pub async fn refresh(&self, source: &dyn ChannelSource) -> Result<usize> {
        let channels = source.load().await?;
        let count = channels.len();
        self.replace(channels);
        debug!(channels = count, "channel snapshot refreshed");
        Ok(count)
    }

    /// Refresh on a fixed interval until `cancel` fires.
    pub fn spawn_refresh(
        self: Arc<Self>,
        source: Arc<dyn ChannelSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("channel refresh stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh(source.as_ref()).await {
                            warn!(error = %e, "channel refresh failed, keeping previous snapshot");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::openai::OpenAiOutbound;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn channel(id: &str, priority: i32) -> Arc<Channel> {
        Arc::new(Channel::new(id, Arc::new(OpenAiOutbound::new(None, "k"))).with_priority(priority))
    }

    #[test]
    fn snapshot_is_sorted_by_priority() {
        let registry =
            ChannelRegistry::with_channels(vec![channel("low", 1), channel("high", 10), channel("mid", 5)]);
        let ids: Vec<String> = registry.snapshot().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn old_snapshot_survives_refresh() {
        let registry = ChannelRegistry::with_channels(vec![channel("a", 0)]);
        let before = registry.snapshot();
        registry
            .refresh(&StaticChannelSource::new(vec![channel("b", 0), channel("c", 0)]))
            .await
            .unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    struct CountingSource(AtomicUsize);

    #[async_trait]
    impl ChannelSource for CountingSource {
        async fn load(&self) -> Result<Vec<Arc<Channel>>> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok((0..=n).map(|i| channel(&format!("c{i}"), 0)).collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_refresh_swaps_until_cancelled() {
        let registry = Arc::new(ChannelRegistry::new());
        let source = Arc::new(CountingSource(AtomicUsize::new(0)));
        let cancel = CancellationToken::new();
        let handle = registry.clone().spawn_refresh(
            source.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
        assert_eq!(registry.snapshot().len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
