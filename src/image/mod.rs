//! Cover-image pipeline: download, normalize, and cache thumbnails.
//!
//! - [`fetcher`] - per-URL download + transcode, memoized by source URL
//! - [`store`] - flat content-addressed directory with size-bounded,
//!   LRU-by-access eviction

mod fetcher;
mod store;

pub use fetcher::{cache_key, ImageFetcher};
pub use store::ImageCacheStore;
