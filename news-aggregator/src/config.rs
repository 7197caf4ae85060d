use crate::types::{AggregatorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://news.db";
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub feeds: Vec<SourceConfig>,
}

/// A feed as declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Proxy URL every fetch is routed through, e.g. `socks5h://127.0.0.1:9050`.
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_after_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            fetch: FetchConfig::default(),
            feeds: Vec::new(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            user_agent: "NewsAggregator/1.0".to_string(),
            timeout_seconds: 30,
            circuit_breaker: CircuitBreakerConfig::default(),
            proxy: None,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_after_seconds: 3600,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl CircuitBreakerConfig {
    pub fn reset_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reset_after_seconds as i64)
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given (it must exist), otherwise `config.yml` if
    /// present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::load(fallback);
        }

        debug!("No configuration file found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Overrides from `DATABASE_URL`, `NEWS_FETCH_CONCURRENCY` and `NEWS_USER_AGENT`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.database_url = url;
        }

        if let Some(raw) = lookup("NEWS_FETCH_CONCURRENCY") {
            match raw.trim().parse::<usize>() {
                Ok(value) => self.fetch.concurrency = value,
                Err(_) => debug!("Ignoring non-numeric NEWS_FETCH_CONCURRENCY: {}", raw),
            }
        }

        if let Some(agent) = lookup("NEWS_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            self.fetch.user_agent = agent;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(AggregatorError::Config("database_url must not be empty".to_string()));
        }
        if self.fetch.concurrency == 0 {
            return Err(AggregatorError::Config("fetch.concurrency must be greater than 0".to_string()));
        }
        if self.fetch.timeout_seconds == 0 {
            return Err(AggregatorError::Config("fetch.timeout_seconds must be greater than 0".to_string()));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AggregatorError::Config("fetch.user_agent must not be empty".to_string()));
        }
        if self.fetch.circuit_breaker.failure_threshold == 0 {
            return Err(AggregatorError::Config(
                "fetch.circuit_breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.fetch.circuit_breaker.reset_after_seconds == 0 {
            return Err(AggregatorError::Config(
                "fetch.circuit_breaker.reset_after_seconds must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            let parsed = Url::parse(&feed.url)
                .map_err(|e| AggregatorError::Config(format!("invalid feed url {}: {}", feed.url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AggregatorError::Config(format!("unsupported feed url scheme: {}", feed.url)));
            }
            if !seen.insert(feed.url.as_str()) {
                return Err(AggregatorError::Config(format!("duplicate feed url: {}", feed.url)));
            }
        }

        Ok(())
    }
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_true() -> bool {
    true
}
