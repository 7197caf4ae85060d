pub mod aggregator;
pub mod circuit;
pub mod clustering;
pub mod config;
pub mod feed_manager;
pub mod fetcher;
pub mod normalizer;
pub mod parser;
pub mod sources;
pub mod traits;
pub mod transport;
pub mod types;
pub mod utils;

pub use aggregator::{ClusterReport, NewsAggregator};
pub use circuit::CircuitBreaker;
pub use config::{AppConfig, CircuitBreakerConfig, FetchConfig, SourceConfig};
pub use feed_manager::FeedManager;
pub use fetcher::{FetchObserver, Fetcher};
pub use normalizer::{NormalizeReport, NormalizeStage, PlainTextNormalizer};
pub use parser::{FeedItem, FeedParser};
pub use sources::SourceHandler;
pub use traits::{ContentNormalizer, Transport, TransportResponse};
pub use transport::HttpTransport;
pub use types::*;
