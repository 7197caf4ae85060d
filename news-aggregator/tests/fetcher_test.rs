mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use news_aggregator::{FetchStatus, Fetcher, HttpTransport, Result, Transport, TransportResponse};
use reqwest::header::HeaderMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_fetcher(store: &FeedManager) -> Fetcher {
    let transport = Arc::new(HttpTransport::new().expect("http client"));
    Fetcher::new(&test_fetch_config(), store.clone(), transport)
}

#[tokio::test]
async fn test_fetch_stores_entries_and_validators() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("User-Agent", TEST_USER_AGENT))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Last-Modified", "Wed, 01 Jan 2025 00:00:00 GMT")
                .set_body_string(rss_feed(&[("a-1", "First"), ("a-2", "Second")])),
        )
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;
    let fetcher = http_fetcher(&store);

    let results = fetcher.fetch_all(vec![source.clone()]).await;
    let result = &results[&source.id];
    assert_eq!(result.status, FetchStatus::Ok);
    assert_eq!(result.new_entries, 2);

    let updated = store.get_source(source.id).await?;
    assert_eq!(updated.etag.as_deref(), Some("\"v1\""));
    assert_eq!(updated.last_modified.as_deref(), Some("Wed, 01 Jan 2025 00:00:00 GMT"));
    assert!(updated.last_fetched_at.is_some());

    let entries = store.entries_for_source(source.id).await?;
    let guids: Vec<&str> = entries.iter().map(|e| e.guid.as_str()).collect();
    assert_eq!(guids, vec!["a-1", "a-2"]);

    // Same body again: nothing new.
    let results = fetcher.fetch_all(vec![updated]).await;
    assert_eq!(results[&source.id].status, FetchStatus::Ok);
    assert_eq!(results[&source.id].new_entries, 0);
    assert_eq!(store.entries_for_source(source.id).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_not_modified_leaves_validators_untouched() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_feed(&[("x", "Unexpected")])))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;
    let fetched_at = Utc::now() - ChronoDuration::hours(2);
    store
        .update_cache_validators(source.id, Some("\"v1\"".to_string()), None, fetched_at)
        .await?;
    let source = store.get_source(source.id).await?;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    let result = &results[&source.id];
    assert_eq!(result.status, FetchStatus::NotModified);
    assert_eq!(result.new_entries, 0);

    let after = store.get_source(source.id).await?;
    assert_eq!(after.etag, source.etag);
    assert_eq!(after.last_modified, source.last_modified);
    assert_eq!(after.last_fetched_at, source.last_fetched_at);
    assert!(store.entries_for_source(source.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_redirects_are_followed() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old.xml"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new.xml"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_feed(&[("moved", "Moved")])))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/old.xml", server.uri()), None).await;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    assert_eq!(results[&source.id].status, FetchStatus::Ok);
    assert_eq!(results[&source.id].new_entries, 1);

    Ok(())
}

#[tokio::test]
async fn test_redirect_loop_is_an_error() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop.xml"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop.xml"))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/loop.xml", server.uri()), None).await;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    let result = &results[&source.id];
    assert_eq!(result.status, FetchStatus::Error);
    assert_eq!(result.message.as_deref(), Some("too many redirects"));

    // The original request plus five followed hops.
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 6);

    let after = store.get_source(source.id).await?;
    assert_eq!(after.consecutive_failures, 1);

    Ok(())
}

#[tokio::test]
async fn test_redirect_without_location() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(307))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    assert_eq!(results[&source.id].status, FetchStatus::Error);
    assert_eq!(results[&source.id].message.as_deref(), Some("redirect without location"));

    Ok(())
}

#[tokio::test]
async fn test_failures_increment_and_reset() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;
    let fetcher = http_fetcher(&store);

    let results = fetcher.fetch_all(vec![source.clone()]).await;
    let result = &results[&source.id];
    assert_eq!(result.status, FetchStatus::Error);
    assert_eq!(result.http_status, Some(500));
    assert_eq!(result.message.as_deref(), Some("HTTP 500"));

    let source = store.get_source(source.id).await?;
    assert_eq!(source.consecutive_failures, 1);
    assert_eq!(source.last_error.as_deref(), Some("HTTP 500"));

    fetcher.fetch_all(vec![source.clone()]).await;
    let source = store.get_source(source.id).await?;
    assert_eq!(source.consecutive_failures, 2);

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_feed(&[("ok", "Recovered")])))
        .mount(&server)
        .await;

    let results = fetcher.fetch_all(vec![source.clone()]).await;
    assert_eq!(results[&source.id].status, FetchStatus::Ok);

    let source = store.get_source(source.id).await?;
    assert_eq!(source.consecutive_failures, 0);
    assert_eq!(source.last_error, None);

    Ok(())
}

#[tokio::test]
async fn test_open_circuit_skips_request() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_feed(&[("a", "A")])))
        .expect(0)
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;
    for _ in 0..3 {
        store.record_failure(source.id, "HTTP 503").await?;
    }
    let source = store.get_source(source.id).await?;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    let result = &results[&source.id];
    assert_eq!(result.status, FetchStatus::CircuitOpen);
    assert_eq!(result.new_entries, 0);
    assert!(result.message.as_deref().unwrap_or_default().contains('3'));

    let after = store.get_source(source.id).await?;
    assert_eq!(after.consecutive_failures, 3);
    assert_eq!(after.last_error.as_deref(), Some("HTTP 503"));

    Ok(())
}

#[tokio::test]
async fn test_same_guid_in_two_sources() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    let body = rss_feed(&[("g1", "Shared")]);
    for feed in ["/a.xml", "/b.xml"] {
        Mock::given(method("GET"))
            .and(path(feed))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .mount(&server)
            .await;
    }

    let store = memory_store().await;
    let a = add_source(&store, &format!("{}/a.xml", server.uri()), None).await;
    let b = add_source(&store, &format!("{}/b.xml", server.uri()), None).await;

    let results = http_fetcher(&store).fetch_all(vec![a.clone(), b.clone()]).await;
    assert_eq!(results[&a.id].new_entries, 1);
    assert_eq!(results[&b.id].new_entries, 1);

    assert_eq!(store.entries_for_source(a.id).await?.len(), 1);
    assert_eq!(store.entries_for_source(b.id).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_timeout_is_reported_as_error() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss_feed(&[("slow", "Slow")]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;

    let mut config = test_fetch_config();
    config.timeout_seconds = 1;
    let fetcher = Fetcher::new(&config, store.clone(), Arc::new(HttpTransport::new()?));

    let results = fetcher.fetch_all(vec![source.clone()]).await;
    let result = &results[&source.id];
    assert_eq!(result.status, FetchStatus::Error);
    assert_eq!(result.message.as_deref(), Some("timeout after 1s"));

    let after = store.get_source(source.id).await?;
    assert_eq!(after.consecutive_failures, 1);

    Ok(())
}

#[tokio::test]
async fn test_malformed_body_yields_no_entries() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Not a feed</body></html>"))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    let result = &results[&source.id];
    assert_eq!(result.status, FetchStatus::Ok);
    assert_eq!(result.new_entries, 0);
    assert_eq!(store.get_source(source.id).await?.consecutive_failures, 0);

    Ok(())
}

#[tokio::test]
async fn test_body_with_byte_order_mark_is_parsed() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    let body = format!("\u{feff}\n  {}", rss_feed(&[("bom", "With BOM")]));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    assert_eq!(results[&source.id].new_entries, 1);

    Ok(())
}

#[tokio::test]
async fn test_discussion_handler_links_comments() -> Result<()> {
    init_tracing();

    let body = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Hacker News</title>
    <link>https://news.ycombinator.com/</link>
    <description>Links for the intellectually curious</description>
    <item>
      <title>Show HN: a thing</title>
      <link>https://thing.example/</link>
      <comments>https://news.ycombinator.com/item?id=1</comments>
      <description><![CDATA[<a href="https://news.ycombinator.com/item?id=1">Comments</a>]]></description>
    </item>
  </channel>
</rss>"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/rss", server.uri()), Some("hacker_news")).await;

    let results = http_fetcher(&store).fetch_all(vec![source.clone()]).await;
    assert_eq!(results[&source.id].new_entries, 1);

    let entries = store.entries_for_source(source.id).await?;
    let entry = &entries[0];
    assert_eq!(entry.guid, "https://thing.example/");
    let raw = entry.raw_content.as_deref().unwrap_or_default();
    assert!(raw.ends_with(r#"<p><a href="https://news.ycombinator.com/item?id=1">Discussion</a></p>"#));

    Ok(())
}

#[tokio::test]
async fn test_observer_called_once_per_source() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_feed(&[("1", "One")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let ok = add_source(&store, &format!("{}/ok.xml", server.uri()), None).await;
    let broken = add_source(&store, &format!("{}/broken.xml", server.uri()), None).await;
    let tripped = add_source(&store, &format!("{}/tripped.xml", server.uri()), None).await;
    for _ in 0..3 {
        store.record_failure(tripped.id, "HTTP 500").await?;
    }
    let tripped = store.get_source(tripped.id).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let fetcher = http_fetcher(&store).with_observer(move |source, result| {
        recorder.lock().unwrap().push((source.id, result.status));
    });

    let results = fetcher.fetch_all(vec![ok.clone(), broken.clone(), tripped.clone()]).await;
    assert_eq!(results.len(), 3);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    let ids: HashSet<i64> = seen.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids.len(), 3);
    assert!(seen.contains(&(ok.id, FetchStatus::Ok)));
    assert!(seen.contains(&(broken.id, FetchStatus::Error)));
    assert!(seen.contains(&(tripped.id, FetchStatus::CircuitOpen)));

    Ok(())
}

#[tokio::test]
async fn test_fast_source_reported_before_slow_sibling() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.xml"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_feed(&[("quick", "Quick")])))
        .mount(&server)
        .await;

    let store = memory_store().await;
    let slow = add_source(&store, &format!("{}/slow.xml", server.uri()), None).await;
    let fast = add_source(&store, &format!("{}/fast.xml", server.uri()), None).await;

    let started = Instant::now();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&reported);
    let fetcher = http_fetcher(&store).with_observer(move |source, _result| {
        recorder.lock().unwrap().push((source.id, started.elapsed()));
    });

    // The slow source is listed first.
    let results = fetcher.fetch_all(vec![slow.clone(), fast.clone()]).await;
    assert_eq!(results[&slow.id].status, FetchStatus::Error);
    assert_eq!(results[&fast.id].status, FetchStatus::Ok);

    let reported = reported.lock().unwrap().clone();
    assert_eq!(reported.len(), 2);
    assert_eq!(reported[0].0, fast.id);
    assert_eq!(reported[1].0, slow.id);
    assert!(reported[0].1 < Duration::from_millis(1500), "fast source reported after {:?}", reported[0].1);
    assert!(reported[1].1 >= Duration::from_secs(3));

    Ok(())
}

#[tokio::test]
async fn test_failed_insert_keeps_previous_validators() -> Result<()> {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v2\"")
                .set_body_string(rss_feed(&[("b-1", "First")])),
        )
        .mount(&server)
        .await;

    let store = memory_store().await;
    let source = add_source(&store, &format!("{}/feed.xml", server.uri()), None).await;
    let fetcher = http_fetcher(&store);

    sqlx::query("CREATE TRIGGER reject_entries BEFORE INSERT ON entries BEGIN SELECT RAISE(ABORT, 'entries rejected'); END")
        .execute(store.get_db_pool())
        .await?;

    let results = fetcher.fetch_all(vec![source.clone()]).await;
    assert_eq!(results[&source.id].status, FetchStatus::Error);

    let after = store.get_source(source.id).await?;
    assert_eq!(after.etag, None);
    assert!(after.last_fetched_at.is_none());
    assert_eq!(after.consecutive_failures, 1);

    // Once inserts work again the same feed is fetched in full.
    sqlx::query("DROP TRIGGER reject_entries").execute(store.get_db_pool()).await?;

    let results = fetcher.fetch_all(vec![after]).await;
    assert_eq!(results[&source.id].status, FetchStatus::Ok);
    assert_eq!(results[&source.id].new_entries, 1);
    assert_eq!(store.get_source(source.id).await?.etag.as_deref(), Some("\"v2\""));

    Ok(())
}

/// Transport that records how many requests are in flight at once.
struct CountingTransport {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> Result<TransportResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(TransportResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: rss_feed(&[(url, "Item")]),
        })
    }
}

#[tokio::test]
async fn test_concurrency_stays_within_limit() -> Result<()> {
    init_tracing();

    let store = memory_store().await;
    let mut sources = Vec::new();
    for i in 0..12 {
        sources.push(add_source(&store, &format!("https://feeds.test/{}.xml", i), None).await);
    }

    let transport = Arc::new(CountingTransport {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });

    let mut config = test_fetch_config();
    config.concurrency = 3;
    let fetcher = Fetcher::new(&config, store.clone(), transport.clone());

    let results = fetcher.fetch_all(sources).await;
    assert_eq!(results.len(), 12);
    assert!(results.values().all(|r| r.status == FetchStatus::Ok && r.new_entries == 1));

    assert_eq!(transport.calls.load(Ordering::SeqCst), 12);
    let max = transport.max_in_flight.load(Ordering::SeqCst);
    assert!(max >= 1 && max <= 3, "max in flight was {}", max);

    Ok(())
}

/// Transport that panics for one URL.
struct PanickingTransport;

#[async_trait]
impl Transport for PanickingTransport {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> Result<TransportResponse> {
        if url.contains("explode") {
            panic!("transport exploded");
        }
        Ok(TransportResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: rss_feed(&[("fine", "Fine")]),
        })
    }
}

#[tokio::test]
async fn test_panic_is_isolated_to_its_source() -> Result<()> {
    init_tracing();

    let store = memory_store().await;
    let good = add_source(&store, "https://feeds.test/good.xml", None).await;
    let bad = add_source(&store, "https://feeds.test/explode.xml", None).await;

    let fetcher = Fetcher::new(&test_fetch_config(), store.clone(), Arc::new(PanickingTransport));
    let results = fetcher.fetch_all(vec![good.clone(), bad.clone()]).await;

    assert_eq!(results[&good.id].status, FetchStatus::Ok);
    assert_eq!(results[&bad.id].status, FetchStatus::Error);
    assert_eq!(store.get_source(bad.id).await?.consecutive_failures, 1);

    Ok(())
}
