use crate::types::{Entry, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;

/// Raw response handed back by a transport. Redirects are not followed at
/// this layer; the fetcher inspects the status and `Location` itself.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl TransportResponse {
    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

/// Strategy for issuing a single GET request (plain HTTP, proxied, or a test double).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<TransportResponse>;
}

/// Turns a stored entry into the normalized article body.
///
/// Returning `None` (or an empty string) means the entry has nothing usable
/// and no article is created for it.
pub trait ContentNormalizer: Send + Sync {
    fn normalize(&self, entry: &Entry) -> Option<String>;
}
