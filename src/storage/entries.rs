use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Entry, EntryDbRow, InsertedEntry, NewEntry};

/// Maximum number of entries to return from any single query (OOM protection)
const MAX_ENTRIES: i64 = 2000;

const ENTRY_COLUMNS: &str = "id, feed_id, dedup_key, guid, title, link, description, content, \
     author, categories, cover_image_url, thumbnail_path, published_at, \
     is_read, read_at, is_favorite, favorited_at, created_at";

impl Database {
    // ========================================================================
    // Ingestion Operations
    // ========================================================================

    /// Which of the given dedup keys already exist for this feed.
    ///
    /// Chunks at 500 keys per query to stay under SQLite's bind-parameter limit.
    pub async fn existing_dedup_keys(&self, feed_id: i64, keys: &[String]) -> Result<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        const CHUNK_SIZE: usize = 500;
        let mut result = Vec::new();

        for chunk in keys.chunks(CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT dedup_key FROM entries WHERE feed_id = ");
            builder.push_bind(feed_id);
            builder.push(" AND dedup_key IN (");

            let mut separated = builder.separated(", ");
            for key in chunk {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            result.extend(rows.into_iter().map(|(key,)| key));
        }

        Ok(result)
    }

    /// Complete a successful sync cycle atomically: insert new entries, stamp
    /// `last_fetched_at`, and clear `last_fetch_error`.
    ///
    /// Inserts use `INSERT OR IGNORE` against UNIQUE(feed_id, dedup_key), so a
    /// concurrent or repeated cycle can never create duplicates; `RETURNING`
    /// reports only the rows that were actually inserted.
    pub async fn complete_feed_sync(
        &self,
        feed_id: i64,
        entries: &[NewEntry],
    ) -> Result<Vec<InsertedEntry>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        // Batch size of 40 keeps us under SQLite's 999 parameter limit
        // (12 columns * 40 = 480 binds).
        const BATCH_SIZE: usize = 40;
        let mut inserted: Vec<InsertedEntry> = Vec::new();

        for chunk in entries.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO entries \
                 (feed_id, dedup_key, guid, title, link, description, content, author, \
                  categories, cover_image_url, published_at, created_at) ",
            );

            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(feed_id)
                    .push_bind(&entry.dedup_key)
                    .push_bind(&entry.guid)
                    .push_bind(&entry.title)
                    .push_bind(&entry.link)
                    .push_bind(&entry.description)
                    .push_bind(&entry.content)
                    .push_bind(&entry.author)
                    .push_bind(&entry.categories)
                    .push_bind(&entry.cover_image_url)
                    .push_bind(entry.published_at)
                    .push_bind(now);
            });

            builder.push(" RETURNING id, cover_image_url");

            let rows: Vec<InsertedEntry> = builder.build_query_as().fetch_all(&mut *tx).await?;
            inserted.extend(rows);
        }

        // Success clears any prior fetch error
        sqlx::query(
            "UPDATE feeds SET last_fetched_at = ?, last_fetch_error = NULL WHERE id = ?",
        )
        .bind(now)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Pre-existing entries with a cover URL but no cached thumbnail, newest
    /// published first. Feeds the bounded per-cycle image retry batch.
    pub async fn entries_missing_thumbnail(
        &self,
        feed_id: i64,
        limit: i64,
    ) -> Result<Vec<InsertedEntry>> {
        let rows: Vec<InsertedEntry> = sqlx::query_as(
            r#"
            SELECT id, cover_image_url
            FROM entries
            WHERE feed_id = ? AND cover_image_url IS NOT NULL AND thumbnail_path IS NULL
            ORDER BY published_at DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Attach a cached thumbnail reference to an entry.
    pub async fn set_entry_thumbnail(&self, entry_id: i64, path: &str) -> Result<()> {
        sqlx::query("UPDATE entries SET thumbnail_path = ? WHERE id = ?")
            .bind(path)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_entries(&self, feed_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Delete oldest-by-published entries until `keep` remain.
    ///
    /// Returns the number of deleted entries. Ties on published_at break by id
    /// so the delete set is deterministic.
    pub async fn prune_entries(&self, feed_id: i64, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM entries
            WHERE id IN (
                SELECT id FROM entries
                WHERE feed_id = ?
                ORDER BY published_at ASC, id ASC
                LIMIT max(0, (SELECT COUNT(*) FROM entries WHERE feed_id = ?) - ?)
            )
        "#,
        )
        .bind(feed_id)
        .bind(feed_id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// Entries for one feed, newest published first, with optional limit
    /// (default 500, hard cap 2000 to prevent OOM).
    pub async fn get_entries_for_feed(
        &self,
        feed_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Entry>> {
        let limit = limit.unwrap_or(500).min(MAX_ENTRIES);
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ? \
             ORDER BY published_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, EntryDbRow>(&sql)
            .bind(feed_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EntryDbRow::into_entry).collect())
    }

    pub async fn get_entry(&self, entry_id: i64) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
        let row = sqlx::query_as::<_, EntryDbRow>(&sql)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(EntryDbRow::into_entry))
    }

    /// Most recent entries across all feeds, for the aggregated wall view.
    pub async fn get_recent_entries(&self, limit: i64) -> Result<Vec<Entry>> {
        let limit = limit.min(MAX_ENTRIES);
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             ORDER BY published_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, EntryDbRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EntryDbRow::into_entry).collect())
    }
}
