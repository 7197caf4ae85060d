use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use news_aggregator::{AppConfig, FetchObserver, FetchResult, FetchStatus, NewsAggregator, Source};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "news-aggregator", about = "Fetch, deduplicate and cluster news feeds")]
struct Cli {
    /// YAML configuration file (defaults to ./config.yml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the database URL from configuration
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync configured sources and fetch every enabled one
    Fetch,
    /// Turn new entries into articles
    Normalize,
    /// Fingerprint and cluster articles, then flag recurring ones
    Cluster,
    /// Fetch, normalize and cluster in one go
    Run,
    /// Show store statistics
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Full-text search over articles (FTS5 query syntax)
    Search {
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },
    /// Manage sources
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },
}

#[derive(Subcommand)]
enum FeedAction {
    /// List sources
    List {
        /// Include disabled sources
        #[arg(short, long)]
        all: bool,
    },
    /// Add a source
    Add {
        url: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Handler tag, e.g. hacker_news or mastodon
        #[arg(long)]
        handler: Option<String>,
    },
    /// Remove a source and everything ingested from it
    Remove { url: String },
    /// Enable or disable a source
    Toggle { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }

    let aggregator = NewsAggregator::new(config)
        .await
        .context("failed to open the database")?;

    match cli.command {
        Commands::Fetch => fetch(&aggregator).await?,
        Commands::Normalize => {
            let report = aggregator.normalize().await?;
            println!("Normalized {} entries ({} skipped)", report.created, report.skipped);
        }
        Commands::Cluster => cluster(&aggregator).await?,
        Commands::Run => {
            fetch(&aggregator).await?;
            let report = aggregator.normalize().await?;
            println!("Normalized {} entries ({} skipped)", report.created, report.skipped);
            cluster(&aggregator).await?;
        }
        Commands::Status { json } => status(&aggregator, json).await?,
        Commands::Search { query, limit } => search(&aggregator, &query, limit).await?,
        Commands::Feed { action } => feed(&aggregator, action).await?,
    }

    Ok(())
}

async fn fetch(aggregator: &NewsAggregator) -> Result<()> {
    aggregator.sync_sources().await?;

    let observer: FetchObserver = Arc::new(|source: &Source, result: &FetchResult| {
        let detail = match result.status {
            FetchStatus::Ok => format!("{} new", result.new_entries),
            _ => result.message.clone().unwrap_or_default(),
        };
        println!("  {:<13} {} {}", result.status.to_string(), source.display_name(), detail);
    });

    let results = aggregator.fetch_all(Some(observer)).await?;
    let new_entries: usize = results.values().map(|r| r.new_entries).sum();
    let failed = results.values().filter(|r| r.is_error()).count();

    info!("Fetched {} sources: {} new entries, {} failed", results.len(), new_entries, failed);
    println!("{} sources, {} new entries, {} failed", results.len(), new_entries, failed);
    Ok(())
}

async fn cluster(aggregator: &NewsAggregator) -> Result<()> {
    let report = aggregator.cluster().await?;
    println!(
        "Fingerprinted {}, assigned {} to {} clusters ({} duplicates), {} recurring",
        report.dedup.fingerprinted,
        report.dedup.assigned,
        report.dedup.clusters_created,
        report.dedup.duplicates,
        report.recurring
    );
    Ok(())
}

async fn status(aggregator: &NewsAggregator, json: bool) -> Result<()> {
    let stats: BTreeMap<String, i64> = aggregator.get_stats().await?.into_iter().collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for (key, value) in &stats {
            println!("{:<20} {}", key, value);
        }
    }
    Ok(())
}

async fn search(aggregator: &NewsAggregator, query: &str, limit: i64) -> Result<()> {
    let hits = aggregator
        .search(query, limit)
        .await
        .with_context(|| format!("search for '{}' failed", query))?;

    if hits.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }

    println!("Results for '{}':", query);
    for (rank, hit) in hits.iter().enumerate() {
        println!("{:>3}. {}", rank + 1, hit.title.as_deref().unwrap_or("Untitled"));
        println!("     {}", hit.excerpt);
    }
    Ok(())
}

async fn feed(aggregator: &NewsAggregator, action: FeedAction) -> Result<()> {
    match action {
        FeedAction::List { all } => {
            for source in aggregator.list_feeds(all).await? {
                let state = if source.enabled { "enabled" } else { "disabled" };
                let handler = source.handler.as_deref().unwrap_or("default");
                println!("{:>4}  {:<8}  {:<12}  {}  {}", source.id, state, handler, source.display_name(), source.url);
                if let Some(last_error) = &source.last_error {
                    println!("        last error ({} in a row): {}", source.consecutive_failures, last_error);
                }
            }
        }
        FeedAction::Add { url, name, handler } => {
            let id = aggregator.add_feed(&url, name, handler).await?;
            println!("Added {} (id {})", url, id);
        }
        FeedAction::Remove { url } => {
            aggregator.remove_feed(&url).await?;
            println!("Removed {}", url);
        }
        FeedAction::Toggle { url } => match aggregator.toggle_feed(&url).await {
            Ok(enabled) => println!("{} is now {}", url, if enabled { "enabled" } else { "disabled" }),
            Err(e) => {
                error!("Failed to toggle {}: {}", url, e);
                return Err(e.into());
            }
        },
    }
    Ok(())
}
