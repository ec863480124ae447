//! Integration tests for the thumbnail cache: size-bounded eviction,
//! access-refresh behavior, and cache-directory reconstruction.
//!
//! Puts go through the public store API with controlled payload sizes so the
//! arithmetic is exact; access ordering comes from the store's own
//! millisecond stamps, separated by short sleeps.

use std::time::Duration;

use feedwall::image::{cache_key, ImageCacheStore, ImageFetcher};
use feedwall::storage::Database;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn store_with_limit(limit: i64) -> (ImageCacheStore, Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(":memory:").await.unwrap();
    let store = ImageCacheStore::new(db.clone(), dir.path().to_path_buf(), limit).unwrap();
    (store, db, dir)
}

/// Keep successive access stamps strictly ordered.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(3)).await;
}

#[tokio::test]
async fn test_eviction_converges_under_limit() {
    // 100 KB limit, 13 puts of 10 KB each. The cache crosses the limit twice
    // and must land at or under the 90 KB watermark each time, keeping the
    // most recent artifacts.
    let (store, _db, dir) = store_with_limit(100_000).await;

    for i in 0..13 {
        store.put(&format!("key{i:02}"), &[0u8; 10_000]).await.unwrap();
        tick().await;
    }

    assert!(
        store.current_size() <= 90_000,
        "size {} should have converged under the 90% watermark",
        store.current_size()
    );

    // Most recently stored artifacts survive
    assert!(dir.path().join("key12.jpg").is_file());
    assert!(dir.path().join("key11.jpg").is_file());
    // Oldest artifacts were evicted
    assert!(!dir.path().join("key00.jpg").exists());
    assert!(!dir.path().join("key01.jpg").exists());
}

#[tokio::test]
async fn test_lookup_refreshes_eviction_order() {
    // Five 10 KB artifacts exactly fill a 50 KB cache. Touching the oldest
    // one right before the overflowing put must save it.
    let (store, _db, dir) = store_with_limit(50_000).await;

    for key in ["a", "b", "c", "d", "e"] {
        store.put(key, &[0u8; 10_000]).await.unwrap();
        tick().await;
    }
    assert_eq!(store.current_size(), 50_000);

    store.lookup("a").await.unwrap();
    tick().await;

    // 60 KB > 50 KB: evict down to <= 45 KB, oldest-access first ("b", "c")
    store.put("f", &[0u8; 10_000]).await.unwrap();

    assert!(dir.path().join("a.jpg").is_file(), "freshly accessed artifact survives");
    assert!(!dir.path().join("b.jpg").exists());
    assert!(!dir.path().join("c.jpg").exists());
    assert!(dir.path().join("d.jpg").is_file());
    assert!(dir.path().join("e.jpg").is_file());
    assert!(dir.path().join("f.jpg").is_file());
    assert_eq!(store.current_size(), 40_000);
}

#[tokio::test]
async fn test_unbounded_cache_never_evicts() {
    let (store, _db, _dir) = store_with_limit(0).await;

    for i in 0..20 {
        store.put(&format!("k{i}"), &[0u8; 10_000]).await.unwrap();
    }
    assert_eq!(store.current_size(), 200_000);
}

#[tokio::test]
async fn test_cache_directory_is_reconstructible() {
    // Wiping the thumbnail directory loses nothing but thumbnails: the next
    // fetch for the same URL downloads and stores again.
    let mock_server = MockServer::start().await;
    let png = {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
        .expect(2) // once before the wipe, once after
        .mount(&mock_server)
        .await;

    let (store, _db, dir) = store_with_limit(0).await;
    let fetcher = ImageFetcher::new(
        reqwest::Client::new(),
        store,
        Duration::from_secs(5),
        600,
        1200,
    );

    let url = format!("{}/cover.png", mock_server.uri());
    let first = fetcher.fetch_and_store(&url).await.unwrap();
    assert_eq!(first, format!("{}.jpg", cache_key(&url)));

    // Wipe the cache directory out from under the store
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    let second = fetcher.fetch_and_store(&url).await.unwrap();
    assert_eq!(second, first, "same content address after reconstruction");
    assert!(dir.path().join(&second).is_file());
}
