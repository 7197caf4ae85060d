use crate::feed_manager::FeedManager;
use crate::traits::ContentNormalizer;
use crate::types::{Entry, Result};
use crate::utils::text::extract_text_from_html;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Strips markup and collapses whitespace. Entries without content fall back
/// to their title.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextNormalizer;

impl ContentNormalizer for PlainTextNormalizer {
    fn normalize(&self, entry: &Entry) -> Option<String> {
        let source = entry
            .raw_content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(entry.title.as_deref())?;

        let text = extract_text_from_html(source);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub created: usize,
    pub skipped: usize,
}

/// Creates an article for every entry that does not have one yet.
pub struct NormalizeStage {
    store: FeedManager,
    normalizer: Arc<dyn ContentNormalizer>,
}

impl NormalizeStage {
    pub fn new(store: FeedManager) -> Self {
        Self::with_normalizer(store, Arc::new(PlainTextNormalizer))
    }

    pub fn with_normalizer(store: FeedManager, normalizer: Arc<dyn ContentNormalizer>) -> Self {
        Self { store, normalizer }
    }

    pub async fn run(&self) -> Result<NormalizeReport> {
        let entries = self.store.entries_without_article().await?;
        let mut report = NormalizeReport::default();

        for entry in &entries {
            match self.normalizer.normalize(entry) {
                Some(body) if !body.trim().is_empty() => {
                    self.store.insert_article(entry.id, &body, Utc::now()).await?;
                    report.created += 1;
                }
                _ => {
                    debug!("Nothing to normalize in entry {} ({})", entry.id, entry.guid);
                    report.skipped += 1;
                }
            }
        }

        info!("Normalized {} entries, skipped {}", report.created, report.skipped);
        Ok(report)
    }
}
