//! Configuration file parser for feedwall.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields`
//! off), though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes between scheduled sync batches.
    pub poll_interval_minutes: u64,

    /// Seconds to wait after startup before the first batch.
    pub startup_delay_secs: u64,

    /// Per-attempt feed fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Retries after the first failed fetch attempt.
    pub fetch_retries: u32,

    /// Fixed delay between fetch attempts, in seconds.
    pub fetch_retry_delay_secs: u64,

    /// Per-image download timeout in seconds.
    pub image_timeout_secs: u64,

    /// How many pre-existing entries get a thumbnail retry per cycle.
    pub image_retry_batch: i64,

    /// Entries kept per feed by the pruning pass (0 = keep everything).
    pub max_items_per_feed: i64,

    /// Image cache size bound in bytes (0 = unbounded).
    pub cache_limit_bytes: i64,

    /// Thumbnail bounding box; images are scaled down to fit, never up.
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,

    /// Root for the database and the thumbnail cache directory.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 30,
            startup_delay_secs: 2,
            fetch_timeout_secs: 60,
            fetch_retries: 2,
            fetch_retry_delay_secs: 3,
            image_timeout_secs: 10,
            image_retry_batch: 5,
            max_items_per_feed: 1000,
            cache_limit_bytes: 512 * 1024 * 1024,
            thumbnail_max_width: 600,
            thumbnail_max_height: 1200,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("feedwall.db")
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.data_dir.join("thumbnails")
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid slurping a corrupted or
        // maliciously large config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "poll_interval_minutes",
                "startup_delay_secs",
                "fetch_timeout_secs",
                "fetch_retries",
                "fetch_retry_delay_secs",
                "image_timeout_secs",
                "image_retry_batch",
                "max_items_per_feed",
                "cache_limit_bytes",
                "thumbnail_max_width",
                "thumbnail_max_height",
                "data_dir",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            poll_interval_minutes = config.poll_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
