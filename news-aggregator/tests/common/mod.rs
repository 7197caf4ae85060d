#![allow(dead_code)]

use chrono::{DateTime, Utc};
pub use news_aggregator::{FeedManager, FetchConfig, NormalizedItem, Source};
use std::sync::Once;

static INIT: Once = Once::new();

pub const TEST_USER_AGENT: &str = "NewsAggregatorTest/1.0";

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Fresh in-memory store with the schema applied.
pub async fn memory_store() -> FeedManager {
    FeedManager::new("sqlite::memory:")
        .await
        .expect("failed to open in-memory database")
}

pub fn test_fetch_config() -> FetchConfig {
    let mut config = FetchConfig::default();
    config.concurrency = 4;
    config.user_agent = TEST_USER_AGENT.to_string();
    config.timeout_seconds = 5;
    config.circuit_breaker.failure_threshold = 3;
    config
}

pub async fn add_source(store: &FeedManager, url: &str, handler: Option<&str>) -> Source {
    let id = store
        .add_source(url, None, handler.map(str::to_string))
        .await
        .expect("failed to add source");
    store.get_source(id).await.expect("source just added")
}

/// Minimal RSS 2.0 document with one item per `(guid, title)` pair.
pub fn rss_feed(items: &[(&str, &str)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com</link>
    <description>Feed used in tests</description>
"#,
    );

    for (guid, title) in items {
        xml.push_str(&format!(
            "    <item>\n      <guid>{guid}</guid>\n      <title>{title}</title>\n      \
             <link>https://example.com/{guid}</link>\n      <description>About {title}</description>\n    </item>\n"
        ));
    }

    xml.push_str("  </channel>\n</rss>\n");
    xml
}

/// Store one entry for `source_id` and an article for it, returning the article id.
pub async fn insert_article(
    store: &FeedManager,
    source_id: i64,
    guid: &str,
    title: Option<&str>,
    body: &str,
    processed_at: DateTime<Utc>,
) -> i64 {
    let item = NormalizedItem {
        guid: guid.to_string(),
        title: title.map(str::to_string),
        url: None,
        raw_content: Some(body.to_string()),
    };
    store.store_entries(source_id, &[item]).await.expect("failed to store entry");

    let entry = store
        .entries_for_source(source_id)
        .await
        .expect("failed to list entries")
        .into_iter()
        .find(|e| e.guid == guid)
        .expect("entry just stored");

    store
        .insert_article(entry.id, body, processed_at)
        .await
        .expect("failed to insert article")
}
