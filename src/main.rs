use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use feedwall::config::Config;
use feedwall::feed::FeedFetcher;
use feedwall::image::{ImageCacheStore, ImageFetcher};
use feedwall::ingest::IngestionEngine;
use feedwall::scheduler::Scheduler;
use feedwall::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(name = "feedwall", about = "Feed ingestion daemon with a thumbnail cache")]
struct Args {
    /// Path to the config file
    #[arg(long, value_name = "FILE", default_value = "feedwall.toml")]
    config: PathBuf,

    /// Register a feed by URL (fetches it once), then exit
    #[arg(long, value_name = "URL")]
    add_feed: Option<String>,

    /// Category for --add-feed
    #[arg(long, value_name = "CATEGORY")]
    category: Option<String>,

    /// List registered feeds, then exit
    #[arg(long)]
    list_feeds: bool,

    /// Sync a single feed by id, then exit
    #[arg(long, value_name = "FEED_ID")]
    sync_feed: Option<i64>,

    /// Run one sync batch over all active feeds, then exit
    #[arg(long)]
    sync_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.data_dir.display()
        )
    })?;

    let db_path = config.database_path();
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedwall appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let fetcher = FeedFetcher::new(
        client.clone(),
        Duration::from_secs(config.fetch_timeout_secs),
        config.fetch_retries,
        Duration::from_secs(config.fetch_retry_delay_secs),
    );
    let store = ImageCacheStore::new(db.clone(), config.thumbnail_dir(), config.cache_limit_bytes)?;
    let images = ImageFetcher::new(
        client,
        store,
        Duration::from_secs(config.image_timeout_secs),
        config.thumbnail_max_width,
        config.thumbnail_max_height,
    );
    let engine = IngestionEngine::new(
        db.clone(),
        fetcher,
        images,
        config.image_retry_batch,
        config.max_items_per_feed,
    );

    // One-shot commands
    if let Some(url) = &args.add_feed {
        let feed_id = engine
            .register_feed(url, args.category.as_deref())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to add feed: {}", e))?;
        println!("Added feed {} ({})", feed_id, url);
        return Ok(());
    }

    if args.list_feeds {
        let feeds = db.get_all_feeds().await?;
        if feeds.is_empty() {
            println!("No feeds registered. Add one with --add-feed <URL>.");
            return Ok(());
        }
        for feed in feeds {
            let status = match (&feed.last_fetch_error, feed.is_active) {
                (_, false) => "inactive".to_string(),
                (Some(err), _) => format!("error: {err}"),
                (None, true) => "ok".to_string(),
            };
            println!(
                "{:>4}  {:<40}  {:>5} entries  {:>5} unread  [{}]",
                feed.id, feed.title, feed.entry_count, feed.unread_count, status
            );
        }
        return Ok(());
    }

    if let Some(feed_id) = args.sync_feed {
        let outcome = engine
            .sync_once(feed_id)
            .await
            .map_err(|e| anyhow::anyhow!("Sync failed: {}", e))?;
        println!(
            "Synced feed {}: {} new entries, {} thumbnails fetched",
            feed_id, outcome.new_entries, outcome.images_fetched
        );
        return Ok(());
    }

    if args.sync_once {
        let summary = engine.sync_all().await;
        println!(
            "Batch complete: {} feeds, {} succeeded, {} failed, {} new entries",
            summary.feeds, summary.succeeded, summary.failed, summary.new_entries
        );
        return Ok(());
    }

    // Daemon mode
    let scheduler = Scheduler::new(
        engine,
        Duration::from_secs(config.poll_interval_minutes * 60),
        Duration::from_secs(config.startup_delay_secs),
    );

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received ctrl-c, shutting down");
        }
    }

    Ok(())
}
