use crate::config::FetchConfig;
use crate::traits::{Transport, TransportResponse};
use crate::types::{AggregatorError, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::debug;

/// Plain reqwest-backed transport, optionally routed through a proxy.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Self::builder().build()?,
        })
    }

    /// Route every request through `proxy_url`, e.g. `socks5h://127.0.0.1:9050`
    /// for a local Tor daemon.
    pub fn with_proxy(proxy_url: &str) -> Result<Self> {
        let proxy = Proxy::all(proxy_url)
            .map_err(|e| AggregatorError::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
        debug!("Routing fetches through proxy {}", proxy_url);

        Ok(Self {
            client: Self::builder().proxy(proxy).build()?,
        })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        match config.proxy.as_deref() {
            Some(proxy) if !proxy.trim().is_empty() => Self::with_proxy(proxy),
            _ => Self::new(),
        }
    }

    fn builder() -> reqwest::ClientBuilder {
        Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::none())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<TransportResponse> {
        let response = self.client.get(url).headers(headers.clone()).send().await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(TransportResponse { status, headers, body })
    }
}
