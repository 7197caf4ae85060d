use super::fingerprint;
use crate::feed_manager::FeedManager;
use crate::types::{FingerprintedArticle, PendingArticle, Result};
use serde::Serialize;
use tracing::{debug, info};

/// Maximum Hamming distance at which two articles count as duplicates.
pub const DUPLICATE_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    /// Articles that received their fingerprint in this run.
    pub fingerprinted: usize,
    /// Articles that received a cluster id in this run.
    pub assigned: usize,
    /// Articles that ended up in a cluster with at least one other article.
    pub duplicates: usize,
    pub clusters_created: usize,
}

/// Fingerprints new articles and groups near-duplicates under a shared cluster id.
///
/// Clustering is incremental: only articles without a cluster id take part,
/// and new ids are always allocated above the largest one already stored.
pub struct Deduplicator {
    store: FeedManager,
}

impl Deduplicator {
    pub fn new(store: FeedManager) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<DedupReport> {
        let fingerprinted = self.fingerprint_pending().await?;

        let articles = self.store.unclustered_articles().await?;
        let first_cluster_id = self.store.max_cluster_id().await?.map_or(1, |max| max + 1);
        let clusters = group_articles(&articles, DUPLICATE_THRESHOLD);

        let mut assignments = Vec::with_capacity(articles.len());
        let mut duplicates = 0;
        for (offset, members) in clusters.iter().enumerate() {
            let cluster_id = first_cluster_id + offset as i64;
            if members.len() > 1 {
                duplicates += members.len();
            }
            assignments.extend(members.iter().map(|id| (*id, cluster_id)));
        }

        let assigned = self.store.assign_clusters(&assignments).await?;

        let report = DedupReport {
            fingerprinted,
            assigned,
            duplicates,
            clusters_created: clusters.len(),
        };

        info!(
            "Clustering done: {} fingerprinted, {} assigned to {} clusters, {} duplicates",
            report.fingerprinted, report.assigned, report.clusters_created, report.duplicates
        );
        Ok(report)
    }

    /// Compute and persist fingerprints for articles that have none yet.
    pub async fn fingerprint_pending(&self) -> Result<usize> {
        let pending = self.store.articles_without_fingerprint().await?;
        let mut count = 0;

        for article in &pending {
            let fingerprint = fingerprint::compute(&fingerprint_text(article));
            if self.store.set_fingerprint(article.id, fingerprint).await? {
                count += 1;
            }
        }

        debug!("Computed fingerprints for {} articles", count);
        Ok(count)
    }
}

/// Title and body joined by a space; a missing title is left out.
pub fn fingerprint_text(article: &PendingArticle) -> String {
    match &article.title {
        Some(title) => format!("{} {}", title, article.body),
        None => article.body.clone(),
    }
}

/// Seed-relative grouping in ascending id order.
///
/// Each still-unassigned article becomes a seed and takes every other
/// unassigned article within `threshold` of the seed itself. Membership is
/// not transitive: two members of a group may be further apart than
/// `threshold`. Returns article ids per group, in creation order.
pub fn group_articles(articles: &[FingerprintedArticle], threshold: u32) -> Vec<Vec<i64>> {
    let mut ordered: Vec<FingerprintedArticle> = articles.to_vec();
    ordered.sort_by_key(|a| a.id);

    let mut assigned = vec![false; ordered.len()];
    let mut groups = Vec::new();

    for seed in 0..ordered.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![ordered[seed].id];

        for other in 0..ordered.len() {
            if assigned[other] {
                continue;
            }
            if fingerprint::distance(ordered[seed].fingerprint, ordered[other].fingerprint) <= threshold {
                assigned[other] = true;
                members.push(ordered[other].id);
            }
        }

        groups.push(members);
    }

    groups
}
