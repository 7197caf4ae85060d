use crate::types::{AggregatorError, Result};
use tracing::debug;

/// Format-neutral view of one feed item, as handed to the source handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    /// Explicit identifier (`<guid>` or `<id>`).
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    /// Discussion page for the item (`<comments>` or an Atom `replies` link).
    pub comments: Option<String>,
    /// Full markup content (`content:encoded` or Atom html content).
    pub content_encoded: Option<String>,
    pub description: Option<String>,
    /// Plain content without markup (Atom text content).
    pub content: Option<String>,
    pub enclosure: Option<Enclosure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse an RSS 2.0 document, falling back to Atom.
    pub fn parse(&self, content: &str) -> Result<Vec<FeedItem>> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let rss_error = match rss::Channel::read_from(content.as_bytes()) {
            Ok(channel) => return Ok(channel.items().iter().map(from_rss_item).collect()),
            Err(e) => e,
        };

        match atom_syndication::Feed::read_from(content.as_bytes()) {
            Ok(feed) => Ok(feed.entries().iter().map(from_atom_entry).collect()),
            Err(atom_error) => Err(AggregatorError::Parse(format!(
                "not an RSS feed ({}) nor an Atom feed ({})",
                rss_error, atom_error
            ))),
        }
    }
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(|s| s.to_string())
}

fn from_rss_item(item: &rss::Item) -> FeedItem {
    FeedItem {
        guid: owned(item.guid().map(|g| g.value())),
        title: owned(item.title()),
        link: owned(item.link()),
        comments: owned(item.comments()),
        content_encoded: owned(item.content()),
        description: owned(item.description()),
        content: None,
        enclosure: item.enclosure().map(|e| Enclosure {
            url: e.url().to_string(),
            mime_type: Some(e.mime_type().to_string()).filter(|m| !m.is_empty()),
        }),
    }
}

fn from_atom_entry(entry: &atom_syndication::Entry) -> FeedItem {
    let links = entry.links();

    let link = links
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| links.first())
        .map(|l| l.href().to_string());

    let comments = links
        .iter()
        .find(|l| l.rel() == "replies")
        .map(|l| l.href().to_string());

    let enclosure = links.iter().find(|l| l.rel() == "enclosure").map(|l| Enclosure {
        url: l.href().to_string(),
        mime_type: owned(l.mime_type()),
    });

    let (content_encoded, content) = match entry.content() {
        Some(c) => {
            let value = owned(c.value());
            match c.content_type() {
                Some("html") | Some("xhtml") => (value, None),
                _ => (None, value),
            }
        }
        None => (None, None),
    };

    FeedItem {
        guid: Some(entry.id().to_string()).filter(|id| !id.is_empty()),
        title: Some(entry.title().as_str().to_string()),
        link,
        comments,
        content_encoded,
        description: entry.summary().map(|s| s.as_str().to_string()),
        content,
        enclosure,
    }
}
