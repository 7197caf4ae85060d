use crate::clustering::{DedupReport, Deduplicator, RecurrenceDetector};
use crate::config::AppConfig;
use crate::feed_manager::FeedManager;
use crate::fetcher::{FetchObserver, Fetcher};
use crate::normalizer::{NormalizeReport, NormalizeStage};
use crate::traits::Transport;
use crate::transport::HttpTransport;
use crate::types::{FetchResult, Result, SearchHit, Source};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterReport {
    pub dedup: DedupReport,
    pub recurring: usize,
}

/// Wires configuration, store and transport into the ingestion and
/// clustering stages.
pub struct NewsAggregator {
    config: AppConfig,
    feed_manager: FeedManager,
    transport: Arc<dyn Transport>,
}

impl NewsAggregator {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&config.fetch)?);
        Self::with_transport(config, transport).await
    }

    pub async fn with_transport(config: AppConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let feed_manager = FeedManager::new(&config.database_url).await?;
        Ok(Self {
            config,
            feed_manager,
            transport,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn feed_manager(&self) -> &FeedManager {
        &self.feed_manager
    }

    /// Insert sources declared in configuration that the store does not know yet.
    pub async fn sync_sources(&self) -> Result<usize> {
        let created = self.feed_manager.sync_sources(&self.config.feeds).await?;
        if created > 0 {
            info!("Synced {} new sources from configuration", created);
        }
        Ok(created)
    }

    pub fn fetcher(&self) -> Fetcher {
        Fetcher::new(&self.config.fetch, self.feed_manager.clone(), Arc::clone(&self.transport))
    }

    pub async fn fetch_all(&self, observer: Option<FetchObserver>) -> Result<HashMap<i64, FetchResult>> {
        let mut fetcher = self.fetcher();
        if let Some(observer) = observer {
            fetcher = fetcher.with_observer(move |source: &Source, result: &FetchResult| observer(source, result));
        }
        fetcher.fetch_enabled().await
    }

    pub async fn normalize(&self) -> Result<NormalizeReport> {
        NormalizeStage::new(self.feed_manager.clone()).run().await
    }

    /// Deduplicate new articles, then flag recurring ones.
    pub async fn cluster(&self) -> Result<ClusterReport> {
        let dedup = Deduplicator::new(self.feed_manager.clone()).run().await?;
        let recurring = RecurrenceDetector::new(self.feed_manager.clone()).run().await?;
        Ok(ClusterReport { dedup, recurring })
    }

    pub async fn get_stats(&self) -> Result<HashMap<String, i64>> {
        self.feed_manager.get_stats().await
    }

    pub async fn add_feed(&self, url: &str, name: Option<String>, handler: Option<String>) -> Result<i64> {
        self.feed_manager.add_source(url, name, handler).await
    }

    pub async fn remove_feed(&self, url: &str) -> Result<()> {
        self.feed_manager.remove_source(url).await
    }

    pub async fn toggle_feed(&self, url: &str) -> Result<bool> {
        self.feed_manager.toggle_source(url).await
    }

    pub async fn list_feeds(&self, include_disabled: bool) -> Result<Vec<Source>> {
        self.feed_manager.list_sources(include_disabled).await
    }

    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
        self.feed_manager.search_articles(query, limit).await
    }
}
