use crate::circuit::CircuitBreaker;
use crate::config::FetchConfig;
use crate::feed_manager::FeedManager;
use crate::parser::FeedParser;
use crate::sources::SourceHandler;
use crate::traits::{Transport, TransportResponse};
use crate::types::{AggregatorError, FetchResult, FetchStatus, NormalizedItem, Result, Source};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use url::Url;

const MAX_REDIRECTS: usize = 5;

/// Called once per source with its terminal result.
pub type FetchObserver = Arc<dyn Fn(&Source, &FetchResult) + Send + Sync>;

/// Fetches many sources concurrently with at most `concurrency` requests in flight.
///
/// Every source gets exactly one terminal result. A failure, timeout or panic
/// in one source never affects the others.
pub struct Fetcher {
    context: Arc<FetchContext>,
    concurrency: usize,
    observer: Option<FetchObserver>,
}

struct FetchContext {
    store: FeedManager,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    parser: FeedParser,
    user_agent: String,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(config: &FetchConfig, store: FeedManager, transport: Arc<dyn Transport>) -> Self {
        Self {
            context: Arc::new(FetchContext {
                store,
                transport,
                breaker: CircuitBreaker::from_config(&config.circuit_breaker),
                parser: FeedParser::new(),
                user_agent: config.user_agent.clone(),
                timeout: config.timeout(),
            }),
            concurrency: config.concurrency.max(1),
            observer: None,
        }
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Source, &FetchResult) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Fetch every enabled source in the store.
    pub async fn fetch_enabled(&self) -> Result<HashMap<i64, FetchResult>> {
        let sources = self.context.store.list_enabled_sources().await?;
        Ok(self.fetch_all(sources).await)
    }

    pub async fn fetch_all(&self, sources: Vec<Source>) -> HashMap<i64, FetchResult> {
        info!("Fetching {} sources (concurrency {})", sources.len(), self.concurrency);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(sources.len());

        for source in sources {
            let context = Arc::clone(&self.context);
            let semaphore = Arc::clone(&semaphore);
            let observer = self.observer.clone();
            let task_source = source.clone();

            // Each task reports its own completion so a slow source never
            // holds back the report of a sibling that finished earlier.
            let handle = tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => context.fetch_source(&task_source).await,
                    Err(_) => FetchResult::error("fetch pool closed"),
                };
                report(observer.as_ref(), &task_source, &result);
                result
            });

            handles.push((source, handle));
        }

        let mut results = HashMap::with_capacity(handles.len());

        for (source, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Fetch task for {} failed: {}", source.url, e);
                    let result = FetchResult::error(format!("fetch task failed: {}", e));
                    if let Err(e) = self.context.store.record_failure(source.id, "fetch task failed").await {
                        error!("Failed to record failure for {}: {}", source.url, e);
                    }
                    report(self.observer.as_ref(), &source, &result);
                    result
                }
            };
            results.insert(source.id, result);
        }

        results
    }
}

impl FetchContext {
    async fn fetch_source(&self, source: &Source) -> FetchResult {
        if self.breaker.is_open(source) {
            return FetchResult::circuit_open(source.consecutive_failures);
        }

        let handler = SourceHandler::from_tag(source.handler.as_deref());

        let result = match tokio::time::timeout(self.timeout, self.attempt(source, handler)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => FetchResult::error(e.to_string()),
            Err(_) => FetchResult::error(format!("timeout after {}s", self.timeout.as_secs())),
        };

        match self.record_outcome(source, &result).await {
            Ok(()) => result,
            Err(e) => {
                error!("Failed to record fetch outcome for {}: {}", source.url, e);
                FetchResult::error(e.to_string())
            }
        }
    }

    async fn attempt(&self, source: &Source, handler: SourceHandler) -> Result<FetchResult> {
        let headers = self.request_headers(source, handler)?;
        let mut url = source.url.clone();
        let mut redirects = 0;

        loop {
            debug!("GET {} ({})", url, handler.name());
            let response = self.transport.get(&url, &headers).await?;

            match response.status {
                200 => return self.ingest(source, handler, response).await,
                304 => return Ok(FetchResult::not_modified()),
                301 | 302 | 303 | 307 | 308 => {
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Ok(FetchResult::error("too many redirects"));
                    }

                    let location = match response.header("location") {
                        Some(location) => location,
                        None => return Ok(FetchResult::error("redirect without location")),
                    };

                    let next = Url::parse(&url)?.join(&location)?;
                    debug!("{} redirected to {}", url, next);
                    url = next.to_string();
                }
                code => return Ok(FetchResult::http_error(code)),
            }
        }
    }

    fn request_headers(&self, source: &Source, handler: SourceHandler) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| AggregatorError::Transport(format!("invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, agent);

        if let Some(etag) = source.etag.as_deref() {
            match HeaderValue::from_str(etag) {
                Ok(value) => {
                    headers.insert(IF_NONE_MATCH, value);
                }
                Err(_) => debug!("Ignoring unusable etag for {}", source.url),
            }
        }

        if let Some(last_modified) = source.last_modified.as_deref() {
            match HeaderValue::from_str(last_modified) {
                Ok(value) => {
                    headers.insert(IF_MODIFIED_SINCE, value);
                }
                Err(_) => debug!("Ignoring unusable last-modified for {}", source.url),
            }
        }

        for (name, value) in handler.extra_headers() {
            headers.insert(name, value);
        }

        Ok(headers)
    }

    async fn ingest(&self, source: &Source, handler: SourceHandler, response: TransportResponse) -> Result<FetchResult> {
        let body = handler.preprocess_body(&response.body);

        let new_entries = match self.parser.parse(&body) {
            Ok(items) => {
                let records: Vec<NormalizedItem> = items.iter().filter_map(|item| handler.transform(item)).collect();
                if records.len() < items.len() {
                    debug!("Skipped {} items without an identifier in {}", items.len() - records.len(), source.url);
                }
                self.store.store_entries(source.id, &records).await?
            }
            Err(e) => {
                warn!("Could not parse feed {}: {}", source.url, e);
                0
            }
        };

        // Validators only move once the entries are committed, otherwise a
        // failed insert would turn the next fetch into a 304.
        self.store
            .update_cache_validators(
                source.id,
                response.header("etag"),
                response.header("last-modified"),
                Utc::now(),
            )
            .await?;

        Ok(FetchResult::ok(new_entries))
    }

    async fn record_outcome(&self, source: &Source, result: &FetchResult) -> Result<()> {
        match result.status {
            FetchStatus::CircuitOpen => Ok(()),
            FetchStatus::Error => {
                let message = result.message.as_deref().unwrap_or("unknown error");
                self.store.record_failure(source.id, message).await
            }
            FetchStatus::Ok | FetchStatus::NotModified => {
                if source.consecutive_failures > 0 {
                    self.store.reset_failures(source.id).await
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn report(observer: Option<&FetchObserver>, source: &Source, result: &FetchResult) {
    log_result(source, result);
    if let Some(observer) = observer {
        observer(source, result);
    }
}

fn log_result(source: &Source, result: &FetchResult) {
    let message = result.message.as_deref().unwrap_or("");
    match result.status {
        FetchStatus::Ok => info!("{}: {} new entries", source.display_name(), result.new_entries),
        FetchStatus::NotModified => debug!("{}: not modified", source.display_name()),
        FetchStatus::Error => warn!("{}: fetch failed: {}", source.display_name(), message),
        FetchStatus::CircuitOpen => warn!("{}: circuit open, {}", source.display_name(), message),
    }
}
