//! Periodic driver for the ingestion engine.
//!
//! One immediate batch shortly after startup (letting binary startup work
//! settle first), then a fixed-interval loop. The engine already contains
//! per-feed failures, so a batch can never take the loop down.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::ingest::IngestionEngine;

pub struct Scheduler {
    engine: IngestionEngine,
    poll_interval: Duration,
    startup_delay: Duration,
}

impl Scheduler {
    pub fn new(engine: IngestionEngine, poll_interval: Duration, startup_delay: Duration) -> Self {
        Self {
            engine,
            poll_interval,
            startup_delay,
        }
    }

    pub fn engine(&self) -> &IngestionEngine {
        &self.engine
    }

    /// Run batches forever. Callers bound the lifetime externally
    /// (`tokio::select!` against a shutdown signal).
    pub async fn run(&self) {
        tokio::time::sleep(self.startup_delay).await;

        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "Scheduler started, running initial sync"
        );
        self.engine.sync_all().await;

        let mut timer = interval(self.poll_interval);
        // A batch that overruns the interval should not cause a burst of
        // catch-up batches afterwards.
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // consume the immediate first tick

        loop {
            timer.tick().await;
            self.engine.sync_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedFetcher;
    use crate::image::{ImageCacheStore, ImageFetcher};
    use crate::storage::Database;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Scheduled Feed</title>
    <item><guid>1</guid><title>One</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    async fn test_engine(db: Database, dir: &TempDir) -> IngestionEngine {
        let client = reqwest::Client::new();
        let store = ImageCacheStore::new(db.clone(), dir.path().to_path_buf(), 0).unwrap();
        let images = ImageFetcher::new(
            client.clone(),
            store,
            Duration::from_secs(5),
            600,
            1200,
        );
        let fetcher = FeedFetcher::new(client, Duration::from_secs(5), 0, Duration::from_millis(1));
        IngestionEngine::new(db, fetcher, images, 5, 0)
    }

    #[tokio::test]
    async fn test_scheduler_runs_initial_and_interval_batches() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let db = Database::open(":memory:").await.unwrap();
        db.create_feed(
            &format!("{}/feed", mock_server.uri()),
            "Scheduled",
            None,
            None,
            None,
        )
        .await
        .unwrap();

        let engine = test_engine(db, &dir).await;
        let scheduler = Arc::new(Scheduler::new(
            engine,
            Duration::from_millis(100),
            Duration::from_millis(10),
        ));

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };

        tokio::time::sleep(Duration::from_millis(400)).await;
        runner.abort();

        let hits = mock_server.received_requests().await.unwrap().len();
        assert!(
            hits >= 2,
            "expected the initial batch plus at least one interval batch, got {hits}"
        );
    }
}
