use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Read / Favorite State
    // ========================================================================

    pub async fn mark_entry_read(&self, entry_id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE entries SET is_read = 1, read_at = ? WHERE id = ? AND is_read = 0")
            .bind(now)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a batch of entries read in one statement. Returns how many rows
    /// actually flipped (already-read entries don't count).
    pub async fn mark_entries_read(&self, entry_ids: &[i64]) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE entries SET is_read = 1, read_at = ");
        builder.push_bind(now);
        builder.push(" WHERE is_read = 0 AND id IN (");
        let mut separated = builder.separated(", ");
        for id in entry_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Mark every unread entry of a feed as read. Returns the flipped count.
    pub async fn mark_feed_read(&self, feed_id: i64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE entries SET is_read = 1, read_at = ? WHERE feed_id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_entry_favorite(&self, entry_id: i64, favorite: bool) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let favorited_at = favorite.then_some(now);
        sqlx::query("UPDATE entries SET is_favorite = ?, favorited_at = ? WHERE id = ?")
            .bind(favorite)
            .bind(favorited_at)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Per-Feed Read Cursor
    // ========================================================================

    /// Advance a feed's read cursor to `viewed_at`, but never backwards.
    /// Returns the cursor value after the call.
    pub async fn advance_read_cursor(&self, feed_id: i64, viewed_at: i64) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_read_cursor (feed_id, last_viewed_at, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(feed_id) DO UPDATE SET
                last_viewed_at = max(last_viewed_at, excluded.last_viewed_at),
                updated_at = excluded.updated_at
            RETURNING last_viewed_at
        "#,
        )
        .bind(feed_id)
        .bind(viewed_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn get_read_cursor(&self, feed_id: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_viewed_at FROM feed_read_cursor WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(ts,)| ts))
    }
}
