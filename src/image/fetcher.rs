use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use reqwest::header::{HeaderValue, REFERER, USER_AGENT};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::store::ImageCacheStore;
use crate::util::parse_http_url;

/// JPEG quality for re-encoded thumbnails.
const JPEG_QUALITY: u8 = 80;

/// User-Agent used for image downloads; distinct from the feed fetcher's
/// header set.
const DOWNLOAD_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Internal error taxonomy for the image pipeline. Never escapes
/// [`ImageFetcher::fetch_and_store`] — every case collapses to `None`.
#[derive(Debug, Error)]
enum ImageError {
    #[error("Not an absolute http/https URL")]
    InvalidUrl,
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Image decode/encode failed: {0}")]
    Codec(#[from] image::ImageError),
    #[error("Cache store error: {0}")]
    Store(String),
}

/// Downloads a remote cover image, normalizes it into a bounded JPEG
/// thumbnail, and stores it content-addressed by source URL.
///
/// Failures are expected here (dead links, hotlink protection, broken
/// encoders in the wild) and are deliberately non-errors: the entry simply
/// has no thumbnail yet and gets retried on a later cycle.
#[derive(Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    store: ImageCacheStore,
    timeout: Duration,
    max_width: u32,
    max_height: u32,
}

impl ImageFetcher {
    pub fn new(
        client: reqwest::Client,
        store: ImageCacheStore,
        timeout: Duration,
        max_width: u32,
        max_height: u32,
    ) -> Self {
        Self {
            client,
            store,
            timeout,
            max_width,
            max_height,
        }
    }

    pub fn store(&self) -> &ImageCacheStore {
        &self.store
    }

    /// Fetch, transcode, and store a cover image; returns the cached
    /// reference path, or `None` on any failure.
    ///
    /// Memoized by source URL: a second call for the same URL returns the
    /// stored path without a network round trip.
    pub async fn fetch_and_store(&self, source_url: &str) -> Option<String> {
        match self.try_fetch_and_store(source_url).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!(url = %source_url, error = %e, "Cover image fetch failed");
                None
            }
        }
    }

    async fn try_fetch_and_store(&self, source_url: &str) -> Result<String, ImageError> {
        let url = parse_http_url(source_url).ok_or(ImageError::InvalidUrl)?;
        let key = cache_key(source_url);

        if let Some(path) = self
            .store
            .lookup(&key)
            .await
            .map_err(|e| ImageError::Store(e.to_string()))?
        {
            return Ok(path);
        }

        let bytes = self.download(&url).await?;
        let thumbnail = transcode(&bytes, self.max_width, self.max_height)?;
        let path = self
            .store
            .put(&key, &thumbnail)
            .await
            .map_err(|e| ImageError::Store(e.to_string()))?;
        Ok(path)
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>, ImageError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, DOWNLOAD_USER_AGENT);

        // Referer from the image's own origin defeats most hotlink protection
        let origin = url.origin().ascii_serialization();
        if let Ok(value) = HeaderValue::from_str(&origin) {
            request = request.header(REFERER, value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ImageError::Timeout)?
            .map_err(ImageError::Network)?;

        if !response.status().is_success() {
            return Err(ImageError::HttpStatus(response.status().as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Deterministic cache key: hex SHA-256 of the source URL string.
pub fn cache_key(source_url: &str) -> String {
    let hash = Sha256::digest(source_url.as_bytes());
    format!("{:x}", hash)
}

/// Decode, flatten any alpha onto white, downscale to fit the bounding box
/// (never upscale), and re-encode as JPEG.
fn transcode(bytes: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let flattened = flatten_onto_white(&decoded);

    let (width, height) = (flattened.width(), flattened.height());
    let resized = if width > max_width || height > max_height {
        let scale = f64::min(
            max_width as f64 / width as f64,
            max_height as f64 / height as f64,
        );
        let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_width);
        let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_height);
        image::imageops::resize(&flattened, new_width, new_height, FilterType::Lanczos3)
    } else {
        flattened
    };

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    encoder.encode_image(&resized)?;
    Ok(buf)
}

/// JPEG has no alpha channel; composite transparent pixels onto white before
/// encoding.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        let blend = |c: u8| (((c as u32) * alpha + 255 * (255 - alpha)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
