use crate::parser::FeedItem;
use crate::types::NormalizedItem;
use crate::utils::text::non_empty;

/// Default mapping from a parsed item to a stored record.
///
/// The guid is the explicit id, else the link, else the title. Items with
/// none of the three are skipped.
pub fn transform(item: &FeedItem) -> Option<NormalizedItem> {
    let guid = non_empty(item.guid.as_deref())
        .or_else(|| non_empty(item.link.as_deref()))
        .or_else(|| non_empty(item.title.as_deref()))?
        .to_string();

    Some(NormalizedItem {
        guid,
        title: item.title.clone(),
        url: item.link.clone(),
        raw_content: raw_content(item),
    })
}

/// First non-empty of encoded content, description, plain content.
pub fn raw_content(item: &FeedItem) -> Option<String> {
    non_empty(item.content_encoded.as_deref())
        .or_else(|| non_empty(item.description.as_deref()))
        .or_else(|| non_empty(item.content.as_deref()))
        .map(|s| s.to_string())
}

/// Drop a leading byte-order mark and whitespace; XML parsers reject
/// anything in front of the declaration.
pub fn preprocess_body(body: &str) -> String {
    body.trim_start_matches('\u{feff}').trim_start().to_string()
}

/// Append an HTML fragment to existing content, or use it alone.
pub fn append_fragment(content: Option<String>, fragment: &str) -> String {
    match content {
        Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, fragment),
        _ => fragment.to_string(),
    }
}
