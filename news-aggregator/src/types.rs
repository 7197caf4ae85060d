use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A feed the aggregator polls, along with its persisted fetch state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub name: Option<String>,
    pub handler: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
}

impl Source {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// One raw item as it was ingested from a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: i64,
    pub source_id: i64,
    pub guid: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub raw_content: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Record produced by a source handler, ready to be stored as an `Entry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedItem {
    pub guid: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub raw_content: Option<String>,
}

/// Normalized, processed form of an entry.
///
/// `fingerprint`, `cluster_id` and `is_recurring` are written by the clustering
/// stage only, each at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: i64,
    pub entry_id: i64,
    pub body: String,
    pub summary: Option<String>,
    pub fingerprint: Option<u64>,
    pub cluster_id: Option<i64>,
    pub is_recurring: bool,
    pub processed_at: DateTime<Utc>,
}

/// One full-text search match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub article_id: i64,
    pub title: Option<String>,
    /// The summary when there is one, otherwise the start of the body.
    pub excerpt: String,
    pub cluster_id: Option<i64>,
}

/// Fingerprinted article as seen by the clustering passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintedArticle {
    pub id: i64,
    pub fingerprint: u64,
}

/// Article waiting for its fingerprint, joined with its entry title.
#[derive(Debug, Clone)]
pub struct PendingArticle {
    pub id: i64,
    pub title: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    NotModified,
    Error,
    CircuitOpen,
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FetchStatus::Ok => "ok",
            FetchStatus::NotModified => "not_modified",
            FetchStatus::Error => "error",
            FetchStatus::CircuitOpen => "circuit_open",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one source's fetch attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchResult {
    pub status: FetchStatus,
    pub new_entries: usize,
    pub message: Option<String>,
    pub http_status: Option<u16>,
}

impl FetchResult {
    pub fn ok(new_entries: usize) -> Self {
        Self {
            status: FetchStatus::Ok,
            new_entries,
            message: None,
            http_status: Some(200),
        }
    }

    pub fn not_modified() -> Self {
        Self {
            status: FetchStatus::NotModified,
            new_entries: 0,
            message: None,
            http_status: Some(304),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::Error,
            new_entries: 0,
            message: Some(message.into()),
            http_status: None,
        }
    }

    pub fn http_error(code: u16) -> Self {
        Self {
            status: FetchStatus::Error,
            new_entries: 0,
            message: Some(format!("HTTP {}", code)),
            http_status: Some(code),
        }
    }

    pub fn circuit_open(consecutive_failures: i64) -> Self {
        Self {
            status: FetchStatus::CircuitOpen,
            new_entries: 0,
            message: Some(format!("skipped after {} consecutive failures", consecutive_failures)),
            http_status: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == FetchStatus::Error
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Source not found: {url}")]
    SourceNotFound { url: String },

    #[error("Source already exists: {url}")]
    SourceExists { url: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
