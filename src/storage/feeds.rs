use anyhow::Result;

use super::schema::Database;
use super::types::{Feed, FeedRow};

const FEED_SELECT: &str = r#"
    SELECT
        f.id, f.title, f.url, f.site_url, f.description, f.category,
        f.poll_interval_minutes, f.last_fetched_at, f.last_fetch_error,
        f.is_active,
        COUNT(e.id) as entry_count,
        COUNT(CASE WHEN e.is_read = 0 THEN 1 END) as unread_count
    FROM feeds f
    LEFT JOIN entries e ON f.id = e.feed_id
"#;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, or update its resolved metadata if the URL is already
    /// registered. Returns the feed id either way.
    ///
    /// User-assigned fields (category) are only set on first insert; a
    /// re-registration never clobbers them.
    pub async fn create_feed(
        &self,
        url: &str,
        title: &str,
        site_url: Option<&str>,
        description: Option<&str>,
        category: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, site_url, description, category, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                site_url = excluded.site_url,
                description = excluded.description
            RETURNING id
        "#,
        )
        .bind(url)
        .bind(title)
        .bind(site_url)
        .bind(description)
        .bind(category)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Get a single feed by id, with entry/unread counts.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let sql = format!("{FEED_SELECT} WHERE f.id = ? GROUP BY f.id");
        let row: Option<FeedRow> = sqlx::query_as(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Feed::from_row))
    }

    /// All feeds, newest-registered first. Read surface for the CRUD layer
    /// and the CLI listing.
    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let sql = format!("{FEED_SELECT} GROUP BY f.id ORDER BY f.created_at DESC, f.id DESC");
        let rows: Vec<FeedRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Feed::from_row).collect())
    }

    /// Feeds eligible for a scheduled sync batch.
    pub async fn get_active_feeds(&self) -> Result<Vec<Feed>> {
        let sql = format!("{FEED_SELECT} WHERE f.is_active = 1 GROUP BY f.id ORDER BY f.id");
        let rows: Vec<FeedRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Feed::from_row).collect())
    }

    /// Record a failed sync cycle: store the (already truncated) error message
    /// and stamp the attempt time. A later successful cycle clears the error.
    pub async fn record_fetch_failure(&self, feed_id: i64, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE feeds SET last_fetch_error = ?, last_fetched_at = ? WHERE id = ?")
            .bind(error)
            .bind(now)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flip a feed's active flag. Inactive feeds are skipped by scheduled runs
    /// but still serve their already-ingested entries.
    pub async fn set_feed_active(&self, feed_id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE feeds SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a feed; entries and read cursor go with it (ON DELETE CASCADE).
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
