use super::base;
use crate::parser::FeedItem;
use crate::types::NormalizedItem;
use crate::utils::text::non_empty;
use crate::utils::url::extract_host;

/// Hosts whose item guids are the discussion page itself.
const DISCUSSION_HOSTS: &[&str] = &["news.ycombinator.com", "lobste.rs"];

/// Default transform plus a link to the item's discussion page.
pub fn transform(item: &FeedItem) -> Option<NormalizedItem> {
    let mut record = base::transform(item)?;

    if let Some(comments_url) = comments_url(item) {
        let fragment = format!(r#"<p><a href="{}">Discussion</a></p>"#, comments_url);
        record.raw_content = Some(base::append_fragment(record.raw_content.take(), &fragment));
    }

    Some(record)
}

pub fn comments_url(item: &FeedItem) -> Option<String> {
    if let Some(comments) = non_empty(item.comments.as_deref()) {
        return Some(comments.to_string());
    }

    let guid = non_empty(item.guid.as_deref())?;
    let host = extract_host(guid)?;
    if DISCUSSION_HOSTS.contains(&host.as_str()) {
        Some(guid.to_string())
    } else {
        None
    }
}
