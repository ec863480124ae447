use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::storage::Database;

/// Size-bounded, content-addressed store of transcoded thumbnails.
///
/// Files live in a single flat directory, named `<hex-hash>.jpg` where the
/// hash is the SHA-256 of the *source URL*. Access times live in the
/// `cached_images` index table, which is also the eviction order. Deleting
/// the whole directory loses nothing but cached thumbnails — it is rebuilt
/// on demand.
#[derive(Clone)]
pub struct ImageCacheStore {
    db: Database,
    root: PathBuf,
    limit_bytes: i64,
}

impl ImageCacheStore {
    /// Open (and create if needed) the cache directory.
    ///
    /// `limit_bytes <= 0` disables eviction entirely.
    pub fn new(db: Database, root: PathBuf, limit_bytes: i64) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create image cache directory {}", root.display()))?;
        Ok(Self {
            db,
            root,
            limit_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up a stored artifact by cache key, bumping its access stamp.
    ///
    /// An index row whose file has gone missing (manual cleanup, a crashed
    /// eviction pass) is dropped and reported as a miss so the caller
    /// re-downloads.
    pub async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let Some(cached) = self.db.get_cached_image(key).await? else {
            return Ok(None);
        };

        if !self.root.join(&cached.path).is_file() {
            tracing::warn!(key = %key, path = %cached.path, "Cached image file missing, dropping index row");
            self.db.delete_cached_image(key).await?;
            return Ok(None);
        }

        self.db.touch_cached_image(key).await?;
        Ok(Some(cached.path))
    }

    /// Store transcoded bytes under a cache key and return the reference path.
    ///
    /// Write order is temp-file → rename → register → evict-check, so eviction
    /// can never observe a half-written artifact, and a crash leaves at worst
    /// an orphaned temp file.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let file_name = format!("{key}.jpg");
        let final_path = self.root.join(&file_name);

        write_atomic(&final_path, bytes)
            .with_context(|| format!("Failed to write cached image {}", final_path.display()))?;

        self.db
            .register_cached_image(key, &file_name, bytes.len() as i64)
            .await?;

        self.evict_if_needed().await;

        Ok(file_name)
    }

    /// Total bytes stored under the cache root, by live directory scan.
    pub fn current_size(&self) -> u64 {
        let Ok(dir) = std::fs::read_dir(&self.root) else {
            return 0;
        };
        dir.filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }

    /// Delete least-recently-accessed artifacts until usage drops to 90% of
    /// the limit.
    ///
    /// Runs after every successful put, does nothing while usage stays at or
    /// under the limit. The 10% headroom keeps a borderline cache from
    /// re-triggering on every put. The newest artifact is never evicted.
    /// Per-artifact failures are logged and skipped.
    async fn evict_if_needed(&self) {
        if self.limit_bytes <= 0 {
            return;
        }

        let mut size = self.current_size();
        if size <= self.limit_bytes as u64 {
            return;
        }

        let target = (self.limit_bytes as u64) * 9 / 10;
        tracing::info!(
            size_bytes = size,
            limit_bytes = self.limit_bytes,
            target_bytes = target,
            "Image cache over limit, evicting oldest thumbnails"
        );

        let rows = match self.db.cached_images_by_access().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list cached images for eviction");
                return;
            }
        };

        let mut evicted = 0usize;
        let count = rows.len();
        for (index, row) in rows.into_iter().enumerate() {
            if size <= target {
                break;
            }
            // Leave the most recently accessed artifact alone
            if index + 1 == count {
                break;
            }

            match std::fs::remove_file(self.root.join(&row.path)) {
                Ok(()) => {
                    size = size.saturating_sub(row.size_bytes as u64);
                    evicted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Already gone; the scan never counted it
                }
                Err(e) => {
                    tracing::warn!(path = %row.path, error = %e, "Failed to evict cached image, skipping");
                    continue;
                }
            }

            if let Err(e) = self.db.delete_cached_image(&row.url_hash).await {
                tracing::warn!(key = %row.url_hash, error = %e, "Failed to drop cached image index row");
            }
        }

        tracing::info!(evicted = evicted, size_bytes = size, "Eviction pass complete");
    }
}

/// Write-to-temp-then-rename so the destination is never half-written.
fn write_atomic(dst: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{nanos:016x}"));

    let mut file = std::fs::File::create(&temp_path)?;
    if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    drop(file);

    if let Err(e) = std::fs::rename(&temp_path, dst) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
