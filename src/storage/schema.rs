use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another instance of feedwall
    /// has the database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Configure SQLite connection options with busy_timeout pragma.
        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. This handles transient lock contention
        // (e.g., concurrent sync cycles) automatically. Using pragma() ensures
        // all connections in the pool inherit this setting.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; 5 connections covers peak concurrent readers
        // (feed sync cycles + image registration + read-surface queries).
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            // Migration errors could also be lock-related
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All schema changes are wrapped in a single transaction: if any step
    /// fails (disk full, power loss), the database stays in its previous
    /// consistent state. All statements use `IF NOT EXISTS` so re-running on
    /// an existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        // Enable foreign keys (must be outside transaction, per-connection setting)
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                site_url TEXT,
                description TEXT,
                category TEXT,
                poll_interval_minutes INTEGER NOT NULL DEFAULT 30,
                last_fetched_at INTEGER,
                last_fetch_error TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                dedup_key TEXT NOT NULL,
                guid TEXT,
                title TEXT NOT NULL,
                link TEXT,
                description TEXT,
                content TEXT,
                author TEXT,
                categories TEXT,
                cover_image_url TEXT,
                thumbnail_path TEXT,
                published_at INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                read_at INTEGER,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                favorited_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE(feed_id, dedup_key)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Per-feed read cursor ("everything up to T has been seen")
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_read_cursor (
                feed_id INTEGER PRIMARY KEY REFERENCES feeds(id) ON DELETE CASCADE,
                last_viewed_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Index of transcoded thumbnails, keyed by SHA-256 of the source URL
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cached_images (
                url_hash TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Covers the read surface's descending-by-published queries and pruning
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_feed_published ON entries(feed_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Partial index for the per-cycle thumbnail retry query
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_missing_thumbnail
             ON entries(feed_id) WHERE cover_image_url IS NOT NULL AND thumbnail_path IS NULL",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_feed_read ON entries(feed_id, is_read)")
            .execute(&mut *tx)
            .await?;

        // Eviction walks cached images oldest-access-first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cached_images_accessed ON cached_images(last_accessed)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
