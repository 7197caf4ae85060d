use super::fingerprint;
use crate::feed_manager::FeedManager;
use crate::types::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

/// Maximum Hamming distance at which a recent article repeats an older one.
pub const RECURRENCE_THRESHOLD: u32 = 12;

const RECENT_WINDOW_HOURS: i64 = 24;
const LOOKBACK_DAYS: i64 = 3;

/// Flags articles from the last day that resemble something seen in the
/// preceding lookback window.
pub struct RecurrenceDetector {
    store: FeedManager,
    threshold: u32,
}

impl RecurrenceDetector {
    pub fn new(store: FeedManager) -> Self {
        Self {
            store,
            threshold: RECURRENCE_THRESHOLD,
        }
    }

    pub async fn run(&self) -> Result<usize> {
        self.run_at(Utc::now()).await
    }

    /// Returns the number of articles newly flagged as recurring.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let recent_cutoff = now - Duration::hours(RECENT_WINDOW_HOURS);
        let lookback_cutoff = now - Duration::days(LOOKBACK_DAYS);

        let older = self
            .store
            .fingerprinted_articles_between(lookback_cutoff, recent_cutoff)
            .await?;
        if older.is_empty() {
            debug!("No older articles to compare against");
            return Ok(0);
        }

        let recent = self.store.recent_unflagged_articles(recent_cutoff).await?;
        let mut flagged = 0;

        for article in &recent {
            let recurring = older
                .iter()
                .any(|old| fingerprint::distance(article.fingerprint, old.fingerprint) <= self.threshold);

            if recurring && self.store.mark_recurring(article.id).await? {
                flagged += 1;
            }
        }

        info!("Flagged {} of {} recent articles as recurring", flagged, recent.len());
        Ok(flagged)
    }
}
