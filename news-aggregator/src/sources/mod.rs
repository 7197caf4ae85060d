pub mod base;
pub mod discussion;
pub mod short_post;

use crate::parser::FeedItem;
use crate::types::NormalizedItem;
use reqwest::header::{HeaderName, HeaderValue};

/// Per-source behaviour applied while ingesting a feed.
///
/// Resolved from the free-form `handler` tag stored on a source. Unknown or
/// missing tags fall back to `Default`, so resolution never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceHandler {
    #[default]
    Default,
    /// Link aggregators whose items point elsewhere and carry a comments page.
    DiscussionThread,
    /// Microblog posts: often untitled, media attached as enclosures.
    ShortPost,
}

impl SourceHandler {
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("hacker_news") | Some("discussion") => SourceHandler::DiscussionThread,
            Some("mastodon") | Some("short_post") => SourceHandler::ShortPost,
            _ => SourceHandler::Default,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceHandler::Default => "default",
            SourceHandler::DiscussionThread => "discussion",
            SourceHandler::ShortPost => "short_post",
        }
    }

    /// Turn a parsed item into a record ready for storage, or `None` to skip it.
    pub fn transform(&self, item: &FeedItem) -> Option<NormalizedItem> {
        match self {
            SourceHandler::Default => base::transform(item),
            SourceHandler::DiscussionThread => discussion::transform(item),
            SourceHandler::ShortPost => short_post::transform(item),
        }
    }

    /// Headers sent in addition to the fetcher's own.
    pub fn extra_headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        match self {
            SourceHandler::ShortPost => short_post::extra_headers(),
            SourceHandler::Default | SourceHandler::DiscussionThread => Vec::new(),
        }
    }

    /// Clean up a response body before it reaches the feed parser.
    pub fn preprocess_body(&self, body: &str) -> String {
        base::preprocess_body(body)
    }
}
