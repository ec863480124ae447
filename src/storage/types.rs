use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of feedwall appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed queries with entry/unread counts
pub(crate) type FeedRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
    Option<String>,
    bool,
    i64, // entry_count
    i64, // unread_count
);

/// A new entry ready for insertion, produced by the ingestion engine from a
/// parsed entry draft.
///
/// `categories` is already serialized to a JSON array string — the entries
/// table stores it as TEXT.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub dedup_key: String,
    pub guid: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub categories: String,
    pub cover_image_url: Option<String>,
    pub published_at: i64,
}

/// Subset of a freshly inserted entry needed to kick off image syncing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InsertedEntry {
    pub id: i64,
    pub cover_image_url: Option<String>,
}

/// Internal row type for Entry queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub dedup_key: String,
    pub guid: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub categories: Option<String>,
    pub cover_image_url: Option<String>,
    pub thumbnail_path: Option<String>,
    pub published_at: i64,
    pub is_read: bool,
    pub read_at: Option<i64>,
    pub is_favorite: bool,
    pub favorited_at: Option<i64>,
    pub created_at: i64,
}

impl EntryDbRow {
    pub(crate) fn into_entry(self) -> Entry {
        let categories = self
            .categories
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();
        Entry {
            id: self.id,
            feed_id: self.feed_id,
            dedup_key: self.dedup_key,
            guid: self.guid,
            title: self.title,
            link: self.link,
            description: self.description,
            content: self.content,
            author: self.author,
            categories,
            cover_image_url: self.cover_image_url,
            thumbnail_path: self.thumbnail_path,
            published_at: self.published_at,
            is_read: self.is_read,
            read_at: self.read_at,
            is_favorite: self.is_favorite,
            favorited_at: self.favorited_at,
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed data from database.
///
/// Fetch-state fields (`last_fetched_at`, `last_fetch_error`) are owned by the
/// ingestion engine; the rest is user-editable through the CRUD surface.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub poll_interval_minutes: i64,
    pub last_fetched_at: Option<i64>,
    /// Message from the last failed sync cycle; `None` means the last attempt
    /// succeeded.
    pub last_fetch_error: Option<String>,
    pub is_active: bool,
    pub entry_count: i64,
    pub unread_count: i64,
}

impl Feed {
    pub(crate) fn from_row(row: FeedRow) -> Self {
        let (
            id,
            title,
            url,
            site_url,
            description,
            category,
            poll_interval_minutes,
            last_fetched_at,
            last_fetch_error,
            is_active,
            entry_count,
            unread_count,
        ) = row;
        Feed {
            id,
            title,
            url,
            site_url,
            description,
            category,
            poll_interval_minutes,
            last_fetched_at,
            last_fetch_error,
            is_active,
            entry_count,
            unread_count,
        }
    }
}

/// Entry data from database.
///
/// Content fields are immutable after insertion; only read/favorite state and
/// `thumbnail_path` change afterwards.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub dedup_key: String,
    pub guid: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub cover_image_url: Option<String>,
    /// Relative path of the cached thumbnail under the image cache root;
    /// `None` means not yet fetched (or every attempt so far has failed).
    pub thumbnail_path: Option<String>,
    pub published_at: i64,
    pub is_read: bool,
    pub read_at: Option<i64>,
    pub is_favorite: bool,
    pub favorited_at: Option<i64>,
    pub created_at: i64,
}

/// One transcoded thumbnail in the content-addressed image cache.
///
/// Keyed by the SHA-256 of the *source URL*, not of the image bytes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CachedImage {
    pub url_hash: String,
    pub path: String,
    pub size_bytes: i64,
    pub last_accessed: i64,
}
