use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::package::PackageRecord;
use crate::platform::SyncTarget;

pub mod feed;

pub use feed::FeedFetcher;

/// `(processed, total, current package)` callback fired while fetching
pub type FetchProgress<'a> = &'a (dyn Fn(u64, u64, &str) + Send + Sync);

/// Produces the complete upstream listing of one sync target
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_all(&self, progress: FetchProgress<'_>) -> Result<Vec<PackageRecord>>;
}

/// Fetcher per sync target
#[derive(Default, Clone)]
pub struct FetcherRegistry {
    fetchers: HashMap<SyncTarget, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feed fetcher for every target with a configured feed
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let client = feed::http_client()?;
        let mut registry = Self::new();
        for (target, source) in &config.feeds {
            registry.register(
                *target,
                Arc::new(FeedFetcher::new(*target, source.clone(), client.clone())),
            );
        }
        Ok(registry)
    }

    pub fn register(&mut self, target: SyncTarget, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(target, fetcher);
    }

    pub fn with(mut self, target: SyncTarget, fetcher: Arc<dyn Fetcher>) -> Self {
        self.register(target, fetcher);
        self
    }

    pub fn get(&self, target: SyncTarget) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(&target).cloned()
    }
}
