use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::time::Duration;
use thiserror::Error;

/// Bodies shorter than this are treated as a transient failure — real feeds
/// are never this small, but rate limiters and captive portals love to return
/// tiny 200s.
const MIN_PLAUSIBLE_BYTES: usize = 50;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving raw feed bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body was empty or implausibly short
    #[error("Implausibly short response: {0} bytes")]
    ShortBody(usize),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// HTTP retrieval of raw feed documents with timeout, bounded retries, and a
/// fixed inter-attempt delay.
///
/// Every failure class — network error, timeout, non-2xx, short body — is
/// treated as transient within the retry budget; the caller sees only the
/// last error once the budget is exhausted. The engine may then fall back to
/// [`FeedFetcher::fetch_basic`] before surfacing the failure.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl FeedFetcher {
    pub fn new(
        client: reqwest::Client,
        timeout: Duration,
        retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            timeout,
            retries,
            retry_delay,
        }
    }

    /// Fetch a feed with a browser-like header set.
    ///
    /// Some hosts serve naive bot blocks to anything that doesn't look like a
    /// browser; the header set sidesteps those.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(url, true).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(e);
                    }
                    tracing::debug!(
                        url = %url,
                        attempt = attempt,
                        error = %e,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Feed fetch failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Secondary strategy: a single plain GET with the client's default
    /// headers, no retries. A few hosts reject the browser header set but
    /// accept a bare request.
    pub async fn fetch_basic(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.attempt(url, false).await
    }

    async fn attempt(&self, url: &str, browser_headers: bool) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url);
        if browser_headers {
            request = request.headers(browser_header_set());
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;

        if bytes.len() < MIN_PLAUSIBLE_BYTES {
            return Err(FetchError::ShortBody(bytes.len()));
        }

        Ok(bytes)
    }
}

fn browser_header_set() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        ),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.7",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{headers, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test</title>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn fast_fetcher() -> FeedFetcher {
        FeedFetcher::new(
            reqwest::Client::new(),
            Duration::from_secs(5),
            2,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let bytes = fast_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_sends_browser_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(headers("Accept-Language", vec!["en-US", "en;q=0.9"]))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fast_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_404_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3) // initial attempt + 2 retries
            .mount(&mock_server)
            .await;

        let result = fast_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        match result.unwrap_err() {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_short_body_is_transient() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = fast_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        match result.unwrap_err() {
            FetchError::ShortBody(2) => {}
            e => panic!("Expected ShortBody(2), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        use wiremock::matchers::any;

        let mock_server = MockServer::start().await;

        // First two requests fail, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let result = fast_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_basic_single_attempt() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1) // no retries on the fallback path
            .mount(&mock_server)
            .await;

        let result = fast_fetcher()
            .fetch_basic(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result.unwrap_err(), FetchError::HttpStatus(500)));
    }
}
