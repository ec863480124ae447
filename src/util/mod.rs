use url::Url;

/// Maximum length of a stored `last_fetch_error` message, in characters.
pub const MAX_ERROR_LEN: usize = 500;

/// Parse and validate an absolute http/https URL.
///
/// Candidate cover-image and feed URLs from arbitrary feed XML go through
/// this before any network use; relative URLs, other schemes, and garbage
/// all come back `None`.
pub fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    url.host_str()?;
    Some(url)
}

/// Truncate an error message to `max_chars`, respecting char boundaries.
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        message.to_string()
    } else {
        message.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_url_accepts_absolute() {
        assert!(parse_http_url("https://example.com/img.png").is_some());
        assert!(parse_http_url("http://example.com/a?b=c").is_some());
        assert!(parse_http_url("  https://example.com/padded  ").is_some());
    }

    #[test]
    fn test_parse_http_url_rejects_relative_and_other_schemes() {
        assert!(parse_http_url("/images/cover.png").is_none());
        assert!(parse_http_url("images/cover.png").is_none());
        assert!(parse_http_url("ftp://example.com/img.png").is_none());
        assert!(parse_http_url("file:///etc/passwd").is_none());
        assert!(parse_http_url("data:image/png;base64,AAAA").is_none());
        assert!(parse_http_url("").is_none());
    }

    #[test]
    fn test_truncate_error_short_message_unchanged() {
        assert_eq!(truncate_error("oops", 500), "oops");
    }

    #[test]
    fn test_truncate_error_long_message() {
        let long = "x".repeat(600);
        let truncated = truncate_error(&long, 500);
        assert_eq!(truncated.chars().count(), 500);
    }

    #[test]
    fn test_truncate_error_multibyte_boundary() {
        let long = "é".repeat(600);
        let truncated = truncate_error(&long, 500);
        assert_eq!(truncated.chars().count(), 500);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
