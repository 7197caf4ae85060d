use crate::config::SourceConfig;
use crate::utils::text::truncate_chars;
use crate::utils::url::is_valid_feed_url;
use crate::types::{
    AggregatorError, Article, Entry, FingerprintedArticle, NormalizedItem, PendingArticle, Result, SearchHit,
    Source,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};
use url::Url;

const EXCERPT_CHARS: usize = 120;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL UNIQUE,
        name TEXT,
        handler TEXT,
        etag TEXT,
        last_modified TEXT,
        last_fetched_at TEXT,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        consecutive_failures INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL,
        guid TEXT NOT NULL,
        title TEXT,
        url TEXT,
        raw_content TEXT,
        fetched_at TEXT NOT NULL,
        UNIQUE (source_id, guid),
        FOREIGN KEY (source_id) REFERENCES sources (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id INTEGER NOT NULL UNIQUE,
        body TEXT NOT NULL,
        summary TEXT,
        fingerprint INTEGER,
        cluster_id INTEGER,
        is_recurring BOOLEAN NOT NULL DEFAULT 0,
        processed_at TEXT NOT NULL,
        FOREIGN KEY (entry_id) REFERENCES entries (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS articles_fts USING fts5(
        title, body, summary,
        tokenize = 'porter'
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS articles_fts_insert AFTER INSERT ON articles BEGIN
        INSERT INTO articles_fts (rowid, title, body, summary)
        SELECT new.id, e.title, new.body, new.summary FROM entries e WHERE e.id = new.entry_id;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS articles_fts_update AFTER UPDATE OF body, summary ON articles BEGIN
        UPDATE articles_fts SET body = new.body, summary = new.summary WHERE rowid = new.id;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS articles_fts_delete AFTER DELETE ON articles BEGIN
        DELETE FROM articles_fts WHERE rowid = old.id;
    END
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sources_enabled ON sources (enabled)",
    "CREATE INDEX IF NOT EXISTS idx_entries_source_id ON entries (source_id)",
    "CREATE INDEX IF NOT EXISTS idx_articles_cluster_id ON articles (cluster_id)",
    "CREATE INDEX IF NOT EXISTS idx_articles_processed_at ON articles (processed_at)",
];

/// SQLite-backed store for sources, entries and articles.
///
/// Cloning is cheap and shares the underlying pool, so every fetch task can
/// carry its own handle.
#[derive(Clone)]
pub struct FeedManager {
    db: SqlitePool,
}

impl FeedManager {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(10));

        // Every connection to an in-memory database sees its own empty database.
        let pool_options = if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let db = pool_options.connect_with(options).await?;
        let manager = Self { db };
        manager.create_schema().await?;

        debug!("Opened database: {}", database_url);
        Ok(manager)
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.db).await?;
        }
        Ok(())
    }

    pub fn get_db_pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert configured sources that are not stored yet. Existing rows keep
    /// their state. Returns the number of sources created.
    pub async fn sync_sources(&self, sources: &[SourceConfig]) -> Result<usize> {
        let mut created = 0;

        for source in sources {
            let result = sqlx::query(
                r#"
                INSERT INTO sources (url, name, handler, enabled)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (url) DO NOTHING
                "#,
            )
            .bind(&source.url)
            .bind(&source.name)
            .bind(&source.handler)
            .bind(source.enabled)
            .execute(&self.db)
            .await?;

            if result.rows_affected() > 0 {
                info!("Added source from configuration: {}", source.url);
                created += 1;
            }
        }

        Ok(created)
    }

    pub async fn add_source(&self, url: &str, name: Option<String>, handler: Option<String>) -> Result<i64> {
        Url::parse(url)?;
        if !is_valid_feed_url(url) {
            return Err(AggregatorError::General(format!("Unsupported URL scheme: {}", url)));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO sources (url, name, handler, enabled)
            VALUES (?, ?, ?, 1)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(url)
        .bind(name)
        .bind(handler)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AggregatorError::SourceExists { url: url.to_string() });
        }

        let source_id = result.last_insert_rowid();
        info!("Added new source: {} with ID: {}", url, source_id);
        Ok(source_id)
    }

    /// Delete a source; its entries and their articles go with it.
    pub async fn remove_source(&self, url: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM sources WHERE url = ?")
            .bind(url)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AggregatorError::SourceNotFound { url: url.to_string() });
        }

        info!("Removed source: {}", url);
        Ok(())
    }

    pub async fn set_enabled(&self, url: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET enabled = ? WHERE url = ?")
            .bind(enabled)
            .bind(url)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AggregatorError::SourceNotFound { url: url.to_string() });
        }
        Ok(())
    }

    /// Flip the enabled flag and return the new value.
    pub async fn toggle_source(&self, url: &str) -> Result<bool> {
        let source = self.get_source_by_url(url).await?;
        let enabled = !source.enabled;
        self.set_enabled(url, enabled).await?;
        Ok(enabled)
    }

    pub async fn get_source(&self, source_id: i64) -> Result<Source> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(AggregatorError::SourceNotFound { url: format!("#{}", source_id) }),
        }
    }

    pub async fn get_source_by_url(&self, url: &str) -> Result<Source> {
        let row = sqlx::query("SELECT * FROM sources WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(AggregatorError::SourceNotFound { url: url.to_string() }),
        }
    }

    pub async fn list_sources(&self, include_disabled: bool) -> Result<Vec<Source>> {
        let sql = if include_disabled {
            "SELECT * FROM sources ORDER BY COALESCE(name, url)"
        } else {
            "SELECT * FROM sources WHERE enabled = 1 ORDER BY COALESCE(name, url)"
        };

        let rows = sqlx::query(sql).fetch_all(&self.db).await?;
        rows.iter().map(source_from_row).collect()
    }

    pub async fn list_enabled_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    /// Persist the validators of a 200 response. Absent headers clear the stored value.
    pub async fn update_cache_validators(
        &self,
        source_id: i64,
        etag: Option<String>,
        last_modified: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE sources SET etag = ?, last_modified = ?, last_fetched_at = ? WHERE id = ?")
            .bind(etag)
            .bind(last_modified)
            .bind(fetched_at)
            .bind(source_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn record_failure(&self, source_id: i64, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sources SET consecutive_failures = consecutive_failures + 1, last_error = ? WHERE id = ?",
        )
        .bind(message)
        .bind(source_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Clear the failure counter; a no-op for sources that were not failing.
    pub async fn reset_failures(&self, source_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sources SET consecutive_failures = 0, last_error = NULL
            WHERE id = ? AND consecutive_failures > 0
            "#,
        )
        .bind(source_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Store entries for a source, skipping guids it already has. Returns the
    /// number of entries actually inserted.
    pub async fn store_entries(&self, source_id: i64, items: &[NormalizedItem]) -> Result<usize> {
        let fetched_at = Utc::now();
        let mut stored_count = 0;
        let mut tx = self.db.begin().await?;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO entries (source_id, guid, title, url, raw_content, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (source_id, guid) DO NOTHING
                "#,
            )
            .bind(source_id)
            .bind(&item.guid)
            .bind(&item.title)
            .bind(&item.url)
            .bind(&item.raw_content)
            .bind(fetched_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                stored_count += 1;
            }
        }

        tx.commit().await?;

        debug!("Stored {} new entries out of {} for source {}", stored_count, items.len(), source_id);
        Ok(stored_count)
    }

    pub async fn entries_for_source(&self, source_id: i64) -> Result<Vec<Entry>> {
        let rows = sqlx::query("SELECT * FROM entries WHERE source_id = ? ORDER BY id")
            .bind(source_id)
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Entries that have not been turned into an article yet.
    pub async fn entries_without_article(&self) -> Result<Vec<Entry>> {
        let rows = sqlx::query(
            r#"
            SELECT e.* FROM entries e
            LEFT JOIN articles a ON a.entry_id = e.id
            WHERE a.id IS NULL
            ORDER BY e.id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn insert_article(&self, entry_id: i64, body: &str, processed_at: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO articles (entry_id, body, processed_at) VALUES (?, ?, ?)")
            .bind(entry_id)
            .bind(body)
            .bind(processed_at)
            .execute(&self.db)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Article> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(article_id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => article_from_row(&row),
            None => Err(AggregatorError::General(format!("Article not found: {}", article_id))),
        }
    }

    pub async fn list_articles(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query("SELECT * FROM articles ORDER BY id").fetch_all(&self.db).await?;
        rows.iter().map(article_from_row).collect()
    }

    pub async fn articles_without_fingerprint(&self) -> Result<Vec<PendingArticle>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.body, e.title FROM articles a
            LEFT JOIN entries e ON e.id = a.entry_id
            WHERE a.fingerprint IS NULL
            ORDER BY a.id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            pending.push(PendingArticle {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                body: row.try_get("body")?,
            });
        }
        Ok(pending)
    }

    /// Set a fingerprint unless one is already stored.
    pub async fn set_fingerprint(&self, article_id: i64, fingerprint: u64) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET fingerprint = ? WHERE id = ? AND fingerprint IS NULL")
            .bind(fingerprint as i64)
            .bind(article_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unclustered_articles(&self) -> Result<Vec<FingerprintedArticle>> {
        let rows = sqlx::query(
            "SELECT id, fingerprint FROM articles WHERE fingerprint IS NOT NULL AND cluster_id IS NULL ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(fingerprinted_from_row).collect()
    }

    pub async fn max_cluster_id(&self) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(cluster_id) FROM articles")
            .fetch_one(&self.db)
            .await?;
        Ok(max)
    }

    /// Write cluster assignments in one transaction. Articles that already
    /// carry a cluster id are left alone.
    pub async fn assign_clusters(&self, assignments: &[(i64, i64)]) -> Result<usize> {
        let mut updated = 0;
        let mut tx = self.db.begin().await?;

        for (article_id, cluster_id) in assignments {
            let result = sqlx::query("UPDATE articles SET cluster_id = ? WHERE id = ? AND cluster_id IS NULL")
                .bind(cluster_id)
                .bind(article_id)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Fingerprinted, not yet flagged articles processed after `since`.
    pub async fn recent_unflagged_articles(&self, since: DateTime<Utc>) -> Result<Vec<FingerprintedArticle>> {
        let rows = sqlx::query(
            r#"
            SELECT id, fingerprint FROM articles
            WHERE processed_at > ? AND fingerprint IS NOT NULL AND is_recurring = 0
            ORDER BY id
            "#,
        )
        .bind(since)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(fingerprinted_from_row).collect()
    }

    /// Fingerprinted articles with `after < processed_at <= until`.
    pub async fn fingerprinted_articles_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<FingerprintedArticle>> {
        let rows = sqlx::query(
            r#"
            SELECT id, fingerprint FROM articles
            WHERE processed_at > ? AND processed_at <= ? AND fingerprint IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(after)
        .bind(until)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(fingerprinted_from_row).collect()
    }

    pub async fn mark_recurring(&self, article_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET is_recurring = 1 WHERE id = ? AND is_recurring = 0")
            .bind(article_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Full-text search over article titles, bodies and summaries, best
    /// matches first. `query` uses FTS5 match syntax.
    pub async fn search_articles(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT a.id, e.title, a.summary, a.body, a.cluster_id
            FROM articles_fts
            JOIN articles a ON a.id = articles_fts.rowid
            LEFT JOIN entries e ON e.id = a.entry_id
            WHERE articles_fts MATCH ?
            ORDER BY bm25(articles_fts), a.id
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let summary: Option<String> = row.try_get("summary")?;
            let body: String = row.try_get("body")?;
            hits.push(SearchHit {
                article_id: row.try_get("id")?,
                title: row.try_get("title")?,
                excerpt: summary.unwrap_or_else(|| truncate_chars(&body, EXCERPT_CHARS)),
                cluster_id: row.try_get("cluster_id")?,
            });
        }

        debug!("Search '{}' matched {} articles", query, hits.len());
        Ok(hits)
    }

    pub async fn get_stats(&self) -> Result<HashMap<String, i64>> {
        let cutoff = Utc::now() - Duration::hours(24);
        let mut stats = HashMap::new();

        let counters: [(&str, &str); 9] = [
            ("total_sources", "SELECT COUNT(*) FROM sources"),
            ("enabled_sources", "SELECT COUNT(*) FROM sources WHERE enabled = 1"),
            ("failing_sources", "SELECT COUNT(*) FROM sources WHERE consecutive_failures > 0 AND enabled = 1"),
            ("entries", "SELECT COUNT(*) FROM entries"),
            ("articles", "SELECT COUNT(*) FROM articles"),
            ("fingerprinted", "SELECT COUNT(*) FROM articles WHERE fingerprint IS NOT NULL"),
            ("clustered", "SELECT COUNT(*) FROM articles WHERE cluster_id IS NOT NULL"),
            (
                "duplicate_groups",
                "SELECT COUNT(*) FROM (SELECT cluster_id FROM articles WHERE cluster_id IS NOT NULL \
                 GROUP BY cluster_id HAVING COUNT(*) > 1)",
            ),
            ("recurring", "SELECT COUNT(*) FROM articles WHERE is_recurring = 1"),
        ];

        for (key, sql) in counters {
            let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.db).await?;
            stats.insert(key.to_string(), count);
        }

        let entries_24h: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE fetched_at > ?")
            .bind(cutoff)
            .fetch_one(&self.db)
            .await?;
        stats.insert("entries_last_24h".to_string(), entries_24h);

        let articles_24h: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE processed_at > ?")
            .bind(cutoff)
            .fetch_one(&self.db)
            .await?;
        stats.insert("articles_last_24h".to_string(), articles_24h);

        Ok(stats)
    }
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        handler: row.try_get("handler")?,
        etag: row.try_get("etag")?,
        last_modified: row.try_get("last_modified")?,
        last_fetched_at: row.try_get::<Option<DateTime<Utc>>, _>("last_fetched_at")?,
        enabled: row.try_get("enabled")?,
        consecutive_failures: row.try_get("consecutive_failures")?,
        last_error: row.try_get("last_error")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<Entry> {
    Ok(Entry {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        guid: row.try_get("guid")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        raw_content: row.try_get("raw_content")?,
        fetched_at: row.try_get::<DateTime<Utc>, _>("fetched_at")?,
    })
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        entry_id: row.try_get("entry_id")?,
        body: row.try_get("body")?,
        summary: row.try_get("summary")?,
        // Stored bit-for-bit as a signed integer.
        fingerprint: row.try_get::<Option<i64>, _>("fingerprint")?.map(|v| v as u64),
        cluster_id: row.try_get("cluster_id")?,
        is_recurring: row.try_get("is_recurring")?,
        processed_at: row.try_get::<DateTime<Utc>, _>("processed_at")?,
    })
}

fn fingerprinted_from_row(row: &SqliteRow) -> Result<FingerprintedArticle> {
    Ok(FingerprintedArticle {
        id: row.try_get("id")?,
        fingerprint: row.try_get::<i64, _>("fingerprint")? as u64,
    })
}
