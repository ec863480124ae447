//! The ingestion engine: one sync cycle per feed.
//!
//! A cycle runs fetch → parse → diff → persist → image sync → prune. The
//! first two stages can fail the cycle (recorded on the feed as
//! `last_fetch_error`); image syncing and pruning are best-effort and never
//! mark a feed failed. One feed's failure never aborts a batch.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use thiserror::Error;

use crate::feed::{parse_feed, EntryDraft, FeedFetcher, FetchError, ParseError, ParsedFeed};
use crate::image::ImageFetcher;
use crate::storage::{Database, Feed, InsertedEntry, NewEntry};
use crate::util::{truncate_error, MAX_ERROR_LEN};

/// Feeds synced concurrently within one batch. Each feed is a single task,
/// so two cycles for the same feed never overlap.
const FEED_CONCURRENCY: usize = 8;

/// Cover images fetched concurrently within one cycle.
const IMAGE_CONCURRENCY: usize = 4;

/// Errors that fail a sync cycle for one feed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Feed not found: {0}")]
    FeedNotFound(i64),
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("Database error: {0}")]
    Database(String),
}

/// Result of one completed sync cycle.
#[derive(Debug, Default, Clone)]
pub struct SyncOutcome {
    pub new_entries: usize,
    pub images_fetched: usize,
    pub images_retried: usize,
    pub pruned: u64,
}

/// Aggregate result of a whole batch run.
#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    pub feeds: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_entries: usize,
}

pub struct IngestionEngine {
    db: Database,
    fetcher: FeedFetcher,
    images: ImageFetcher,
    /// Per-cycle budget of thumbnail retries for pre-existing entries.
    image_retry_batch: i64,
    /// Pruning target; <= 0 disables pruning.
    max_items_per_feed: i64,
}

impl IngestionEngine {
    pub fn new(
        db: Database,
        fetcher: FeedFetcher,
        images: ImageFetcher,
        image_retry_batch: i64,
        max_items_per_feed: i64,
    ) -> Self {
        Self {
            db,
            fetcher,
            images,
            image_retry_batch,
            max_items_per_feed,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Register a feed by URL: fetch and parse it once to resolve its title,
    /// site URL, and description, then run the rest of the cycle on the
    /// parsed result. Returns the feed id.
    pub async fn register_feed(
        &self,
        url: &str,
        category: Option<&str>,
    ) -> Result<i64, SyncError> {
        let bytes = self.fetch_with_fallback(url).await?;
        let parsed = parse_feed(&bytes)?;

        let feed_id = self
            .db
            .create_feed(
                url,
                &parsed.meta.title,
                parsed.meta.site_url.as_deref(),
                parsed.meta.description.as_deref(),
                category,
            )
            .await
            .map_err(db_err)?;

        let outcome = self.ingest_parsed(feed_id, parsed).await?;
        tracing::info!(
            feed_id = feed_id,
            url = %url,
            entries = outcome.new_entries,
            "Feed registered"
        );
        Ok(feed_id)
    }

    /// Manual trigger for one feed. Same pipeline as a scheduled run; a
    /// failure is recorded on the feed *and* surfaced to the caller.
    pub async fn sync_once(&self, feed_id: i64) -> Result<SyncOutcome, SyncError> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await
            .map_err(db_err)?
            .ok_or(SyncError::FeedNotFound(feed_id))?;
        self.sync_feed(&feed).await
    }

    /// Run one batch over all active feeds with bounded concurrency.
    ///
    /// Per-feed failures are recorded and counted; nothing propagates out.
    pub async fn sync_all(&self) -> BatchSummary {
        let feeds = match self.db.get_active_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load active feeds, skipping batch");
                return BatchSummary::default();
            }
        };

        let total = feeds.len();
        tracing::info!(feeds = total, "Starting sync batch");

        let results: Vec<Result<SyncOutcome, SyncError>> = stream::iter(feeds)
            .map(|feed| async move { self.sync_feed(&feed).await })
            .buffer_unordered(FEED_CONCURRENCY)
            .collect()
            .await;

        let mut summary = BatchSummary {
            feeds: total,
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(outcome) => {
                    summary.succeeded += 1;
                    summary.new_entries += outcome.new_entries;
                }
                Err(_) => summary.failed += 1,
            }
        }

        tracing::info!(
            feeds = summary.feeds,
            succeeded = summary.succeeded,
            failed = summary.failed,
            new_entries = summary.new_entries,
            "Sync batch complete"
        );
        summary
    }

    /// One full cycle for one feed.
    async fn sync_feed(&self, feed: &Feed) -> Result<SyncOutcome, SyncError> {
        // Fetching
        let bytes = match self.fetch_with_fallback(&feed.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed fetch failed");
                self.record_failure(feed.id, &e.to_string()).await;
                return Err(e);
            }
        };

        // Parsing
        let parsed = match parse_feed(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed parse failed");
                self.record_failure(feed.id, &e.to_string()).await;
                return Err(SyncError::Parse(e));
            }
        };

        let outcome = self.ingest_parsed(feed.id, parsed).await?;
        tracing::info!(
            feed_id = feed.id,
            title = %feed.title,
            new_entries = outcome.new_entries,
            images = outcome.images_fetched,
            retried = outcome.images_retried,
            pruned = outcome.pruned,
            "Feed sync complete"
        );
        Ok(outcome)
    }

    /// Primary fetch with browser-like headers, then the plain fallback.
    /// On double failure the primary error is the one reported — it is
    /// almost always the informative one.
    async fn fetch_with_fallback(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        match self.fetcher.fetch(url).await {
            Ok(bytes) => Ok(bytes),
            Err(primary) => match self.fetcher.fetch_basic(url).await {
                Ok(bytes) => {
                    tracing::debug!(url = %url, "Plain fallback fetch succeeded");
                    Ok(bytes)
                }
                Err(_) => Err(SyncError::Fetch(primary)),
            },
        }
    }

    /// Diff → persist → image sync → prune for an already-parsed document.
    async fn ingest_parsed(
        &self,
        feed_id: i64,
        parsed: ParsedFeed,
    ) -> Result<SyncOutcome, SyncError> {
        if parsed.skipped > 0 {
            tracing::warn!(
                feed_id = feed_id,
                skipped = parsed.skipped,
                "Entries without guid or link skipped"
            );
        }

        // Diffing: drop entries already present under their dedup key, and
        // collapse duplicate keys within the same document.
        let mut drafts: Vec<(String, EntryDraft)> = Vec::with_capacity(parsed.entries.len());
        let mut seen = HashSet::new();
        for draft in parsed.entries {
            let Some(key) = draft.dedup_key().map(str::to_string) else {
                continue;
            };
            if seen.insert(key.clone()) {
                drafts.push((key, draft));
            }
        }

        let keys: Vec<String> = drafts.iter().map(|(key, _)| key.clone()).collect();
        let existing: HashSet<String> = self
            .db
            .existing_dedup_keys(feed_id, &keys)
            .await
            .map_err(db_err)?
            .into_iter()
            .collect();

        let new_entries: Vec<NewEntry> = drafts
            .into_iter()
            .filter(|(key, _)| !existing.contains(key))
            .map(|(key, draft)| to_new_entry(key, draft))
            .collect();

        // Image retry candidates are selected before persisting so the batch
        // contains only pre-existing entries.
        let retry_batch = if self.image_retry_batch > 0 {
            self.db
                .entries_missing_thumbnail(feed_id, self.image_retry_batch)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(feed_id = feed_id, error = %e, "Failed to select thumbnail retry batch");
                    Vec::new()
                })
        } else {
            Vec::new()
        };

        // Persisting: inserts + fetch-state update in one transaction
        let inserted = self
            .db
            .complete_feed_sync(feed_id, &new_entries)
            .await
            .map_err(db_err)?;

        // ImageSyncing and Pruning are best-effort: nothing below this point
        // fails the cycle.
        let (images_fetched, images_retried) =
            self.sync_images(feed_id, &inserted, &retry_batch).await;
        let pruned = self.prune(feed_id).await;

        Ok(SyncOutcome {
            new_entries: inserted.len(),
            images_fetched,
            images_retried,
            pruned,
        })
    }

    async fn record_failure(&self, feed_id: i64, message: &str) {
        let truncated = truncate_error(message, MAX_ERROR_LEN);
        if let Err(e) = self.db.record_fetch_failure(feed_id, &truncated).await {
            tracing::warn!(feed_id = feed_id, error = %e, "Failed to record fetch failure");
        }
    }

    /// Fetch thumbnails for newly inserted entries plus the retry batch,
    /// concurrently. Returns (new-entry successes, retry successes).
    async fn sync_images(
        &self,
        feed_id: i64,
        inserted: &[InsertedEntry],
        retry_batch: &[InsertedEntry],
    ) -> (usize, usize) {
        let jobs: Vec<(i64, String, bool)> = inserted
            .iter()
            .filter_map(|e| e.cover_image_url.clone().map(|url| (e.id, url, false)))
            .chain(
                retry_batch
                    .iter()
                    .filter_map(|e| e.cover_image_url.clone().map(|url| (e.id, url, true))),
            )
            .collect();

        if jobs.is_empty() {
            return (0, 0);
        }

        let results: Vec<(i64, Option<String>, bool)> = stream::iter(jobs)
            .map(|(entry_id, url, is_retry)| async move {
                let path = self.images.fetch_and_store(&url).await;
                (entry_id, path, is_retry)
            })
            .buffer_unordered(IMAGE_CONCURRENCY)
            .collect()
            .await;

        let mut fetched = 0usize;
        let mut retried = 0usize;
        for (entry_id, path, is_retry) in results {
            let Some(path) = path else {
                continue;
            };
            match self.db.set_entry_thumbnail(entry_id, &path).await {
                Ok(()) => {
                    if is_retry {
                        retried += 1;
                    } else {
                        fetched += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        feed_id = feed_id,
                        entry_id = entry_id,
                        error = %e,
                        "Failed to attach thumbnail"
                    );
                }
            }
        }
        (fetched, retried)
    }

    /// Capacity-based retention with hysteresis: nothing happens until the
    /// entry count exceeds 120% of the target, then the oldest entries are
    /// deleted until exactly the target remains.
    async fn prune(&self, feed_id: i64) -> u64 {
        if self.max_items_per_feed <= 0 {
            return 0;
        }

        let count = match self.db.count_entries(feed_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Failed to count entries for pruning");
                return 0;
            }
        };

        if count * 10 <= self.max_items_per_feed * 12 {
            return 0;
        }

        match self.db.prune_entries(feed_id, self.max_items_per_feed).await {
            Ok(pruned) => {
                tracing::info!(
                    feed_id = feed_id,
                    pruned = pruned,
                    kept = self.max_items_per_feed,
                    "Pruned old entries"
                );
                pruned
            }
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Pruning failed");
                0
            }
        }
    }
}

fn to_new_entry(dedup_key: String, draft: EntryDraft) -> NewEntry {
    let categories =
        serde_json::to_string(&draft.categories).unwrap_or_else(|_| "[]".to_string());
    NewEntry {
        dedup_key,
        guid: draft.guid,
        title: draft.title,
        link: draft.link,
        description: draft.summary,
        content: draft.content,
        author: draft.author,
        categories,
        cover_image_url: draft.cover_image,
        published_at: draft.published_at,
    }
}

fn db_err(e: anyhow::Error) -> SyncError {
    SyncError::Database(e.to_string())
}
