use anyhow::Result;

use super::schema::Database;
use super::types::CachedImage;

impl Database {
    // ========================================================================
    // Cached Image Index
    // ========================================================================

    pub async fn get_cached_image(&self, url_hash: &str) -> Result<Option<CachedImage>> {
        let row: Option<CachedImage> = sqlx::query_as(
            "SELECT url_hash, path, size_bytes, last_accessed FROM cached_images WHERE url_hash = ?",
        )
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Register (or re-register) a stored thumbnail. At most one row per
    /// source-URL hash; a repeated put for the same key overwrites in place.
    ///
    /// Access stamps are millisecond-resolution so that puts and touches
    /// landing within the same second still have a meaningful LRU order.
    pub async fn register_cached_image(
        &self,
        url_hash: &str,
        path: &str,
        size_bytes: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO cached_images (url_hash, path, size_bytes, last_accessed, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url_hash) DO UPDATE SET
                path = excluded.path,
                size_bytes = excluded.size_bytes,
                last_accessed = excluded.last_accessed
        "#,
        )
        .bind(url_hash)
        .bind(path)
        .bind(size_bytes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump the access stamp for a reused thumbnail.
    pub async fn touch_cached_image(&self, url_hash: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query("UPDATE cached_images SET last_accessed = ? WHERE url_hash = ?")
            .bind(now)
            .bind(url_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All cached images, least recently accessed first (eviction order).
    pub async fn cached_images_by_access(&self) -> Result<Vec<CachedImage>> {
        let rows: Vec<CachedImage> = sqlx::query_as(
            "SELECT url_hash, path, size_bytes, last_accessed FROM cached_images \
             ORDER BY last_accessed ASC, url_hash ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_cached_image(&self, url_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM cached_images WHERE url_hash = ?")
            .bind(url_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
