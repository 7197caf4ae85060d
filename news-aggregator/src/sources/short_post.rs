use super::base;
use crate::parser::{Enclosure, FeedItem};
use crate::types::NormalizedItem;
use crate::utils::text::{strip_tags, truncate_chars};
use reqwest::header::{HeaderName, HeaderValue, ACCEPT};

const TITLE_MAX_CHARS: usize = 80;

const FEED_ACCEPT: &str = "application/atom+xml, application/rss+xml;q=0.9, application/xml;q=0.8, */*;q=0.5";

/// Default transform plus attached media, and a title derived from the
/// content when the post has none.
pub fn transform(item: &FeedItem) -> Option<NormalizedItem> {
    let mut record = base::transform(item)?;

    if let Some(enclosure) = &item.enclosure {
        let fragment = media_fragment(enclosure);
        record.raw_content = Some(base::append_fragment(record.raw_content.take(), &fragment));
    }

    let untitled = record.title.as_deref().map_or(true, |t| t.trim().is_empty());
    if untitled {
        let plain = record.raw_content.as_deref().map(strip_tags).unwrap_or_default();
        record.title = Some(truncate_chars(&plain, TITLE_MAX_CHARS));
    }

    Some(record)
}

pub fn media_fragment(enclosure: &Enclosure) -> String {
    let mime = enclosure.mime_type.as_deref().unwrap_or("");
    if mime.starts_with("image/") {
        format!(r#"<p><img src="{}" alt="attached media" /></p>"#, enclosure.url)
    } else if mime.starts_with("video/") {
        format!(r#"<p><video src="{}" controls>attached video</video></p>"#, enclosure.url)
    } else {
        format!(r#"<p><a href="{}">Attachment</a></p>"#, enclosure.url)
    }
}

pub fn extra_headers() -> Vec<(HeaderName, HeaderValue)> {
    vec![(ACCEPT, HeaderValue::from_static(FEED_ACCEPT))]
}
