use chrono::Utc;
use feed_rs::parser;
use scraper::{Html, Selector};
use thiserror::Error;

use crate::util::parse_http_url;

/// Errors from turning raw feed bytes into entry drafts.
///
/// The underlying parser is lenient: partially recoverable feeds still yield
/// entries. This error surfaces only when the input is rejected outright.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed feed: {0}")]
    Malformed(#[from] feed_rs::parser::ParseFeedError),
}

/// Feed-level metadata resolved at sync time.
#[derive(Debug, Clone)]
pub struct FeedMeta {
    pub title: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
}

/// One entry as extracted from the feed, before deduplication.
///
/// Every optional field is populated by an ordered chain of extractor
/// attempts over the source entry; nothing here has touched the database yet.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub guid: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub cover_image: Option<String>,
    pub published_at: i64,
}

impl EntryDraft {
    /// Stable per-feed identifier: guid when the source provides one, else
    /// the entry link.
    pub fn dedup_key(&self) -> Option<&str> {
        self.guid.as_deref().or(self.link.as_deref())
    }
}

/// Result of parsing one feed document.
pub struct ParsedFeed {
    pub meta: FeedMeta,
    pub entries: Vec<EntryDraft>,
    /// Entries dropped because they carry neither guid nor link.
    pub skipped: usize,
}

/// Parse raw feed bytes into normalized metadata and entry drafts.
///
/// Entries without a usable dedup key (no guid, no link) are dropped and
/// counted in `skipped`. Entries without any source timestamp get a
/// synthesized one: `now + (total - index)` seconds, so the feed's own
/// ordering survives a descending-by-published sort.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // feed-rs normally backfills missing entry ids from a hash of link and
    // title. That would make a guid-less entry's identity drift when its
    // title is edited, so missing ids are kept missing and dedup falls back
    // to the link.
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    let meta = FeedMeta {
        title: feed
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled Feed".to_string()),
        site_url: feed.links.first().map(|l| l.href.clone()),
        description: feed
            .description
            .map(|t| t.content)
            .filter(|d| !d.trim().is_empty()),
    };

    let now = Utc::now().timestamp();
    let total = feed.entries.len();
    let mut skipped = 0usize;

    let entries: Vec<EntryDraft> = feed
        .entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let guid = match entry.id.trim() {
                "" => None,
                id => Some(id.to_string()),
            };
            let link = entry.links.first().map(|l| l.href.clone());

            if guid.is_none() && link.is_none() {
                skipped += 1;
                return None;
            }

            let cover_image = cover_image_url(&entry);
            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp())
                .unwrap_or_else(|| now + (total - index) as i64);

            let title = entry
                .title
                .map(|t| t.content)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let summary = entry.summary.map(|s| s.content);
            let content = entry.content.and_then(|c| c.body);
            let author = entry
                .authors
                .into_iter()
                .map(|p| p.name)
                .find(|n| !n.trim().is_empty());
            let categories: Vec<String> = entry
                .categories
                .into_iter()
                .map(|c| c.term)
                .filter(|t| !t.trim().is_empty())
                .collect();

            Some(EntryDraft {
                guid,
                title,
                link,
                summary,
                content,
                author,
                categories,
                cover_image,
                published_at,
            })
        })
        .collect();

    Ok(ParsedFeed {
        meta,
        entries,
        skipped,
    })
}

/// Best-effort cover image URL for an entry.
///
/// Priority: enclosures with a declared image MIME type, then media content
/// URLs not claimed by another media type, then media thumbnails, then the
/// first `<img src>` found in the content or summary HTML. Candidates must
/// be absolute http/https; the first valid one wins.
fn cover_image_url(entry: &feed_rs::model::Entry) -> Option<String> {
    // 1. Enclosures that declare an image MIME type. Depending on the feed
    // flavor, feed-rs surfaces enclosures as rel="enclosure" links, as the
    // entry content's src, or as media content.
    for link in &entry.links {
        let is_enclosure = link.rel.as_deref() == Some("enclosure");
        let is_image = link
            .media_type
            .as_deref()
            .is_some_and(|m| m.starts_with("image/"));
        if is_enclosure && is_image {
            if let Some(url) = parse_http_url(&link.href) {
                return Some(url.as_str().to_string());
            }
        }
    }
    if let Some(content) = &entry.content {
        if content.content_type.to_string().starts_with("image/") {
            if let Some(url) = content
                .src
                .as_ref()
                .and_then(|link| parse_http_url(&link.href))
            {
                return Some(url.as_str().to_string());
            }
        }
    }
    for media in &entry.media {
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .is_some_and(|m| m.to_string().starts_with("image/"));
            if is_image {
                if let Some(url) = content
                    .url
                    .as_ref()
                    .and_then(|u| parse_http_url(u.as_str()))
                {
                    return Some(url.as_str().to_string());
                }
            }
        }
    }

    // 2. Untyped media content URLs. Media objects that declare a non-image
    // type are podcast/video enclosures, never covers.
    for media in &entry.media {
        for content in &media.content {
            let declares_other_type = content
                .content_type
                .as_ref()
                .is_some_and(|m| !m.to_string().starts_with("image/"));
            if declares_other_type {
                continue;
            }
            if let Some(url) = content
                .url
                .as_ref()
                .and_then(|u| parse_http_url(u.as_str()))
            {
                return Some(url.as_str().to_string());
            }
        }
    }

    // 3. media:thumbnail
    for media in &entry.media {
        for thumbnail in &media.thumbnails {
            if let Some(url) = parse_http_url(&thumbnail.image.uri) {
                return Some(url.as_str().to_string());
            }
        }
    }

    // 4. First <img src> in content HTML, else summary HTML
    let content_html = entry.content.as_ref().and_then(|c| c.body.as_deref());
    let summary_html = entry.summary.as_ref().map(|s| s.content.as_str());
    for html in [content_html, summary_html].into_iter().flatten() {
        if let Some(url) = first_img_src(html) {
            return Some(url);
        }
    }

    None
}

/// First absolute http/https `<img src>` in an HTML fragment.
fn first_img_src(html: &str) -> Option<String> {
    let selector = Selector::parse("img").ok()?;
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&selector)
        .filter_map(|element| element.value().attr("src"))
        .filter_map(parse_http_url)
        .map(|url| url.as_str().to_string())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss(items: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
<channel>
    <title>Test Feed</title>
    <link>https://example.com</link>
    <description>A feed for tests</description>
    {items}
</channel></rss>"#
        )
        .into_bytes()
    }

    #[test]
    fn test_feed_metadata() {
        let parsed = parse_feed(&rss("")).unwrap();
        assert_eq!(parsed.meta.title, "Test Feed");
        assert_eq!(parsed.meta.site_url.as_deref(), Some("https://example.com"));
        assert_eq!(parsed.meta.description.as_deref(), Some("A feed for tests"));
        assert!(parsed.entries.is_empty());
    }

    #[test]
    fn test_dedup_key_prefers_guid() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>g-1</guid><link>https://example.com/a</link><title>A</title></item>"#,
        ))
        .unwrap();
        assert_eq!(parsed.entries[0].dedup_key(), Some("g-1"));
    }

    #[test]
    fn test_dedup_key_falls_back_to_link() {
        let parsed = parse_feed(&rss(
            r#"<item><link>https://example.com/a</link><title>A</title></item>"#,
        ))
        .unwrap();
        assert_eq!(parsed.entries[0].dedup_key(), Some("https://example.com/a"));
    }

    #[test]
    fn test_entry_without_guid_or_link_skipped() {
        let parsed = parse_feed(&rss(r#"<item><title>Orphan</title></item>"#)).unwrap();
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn test_cover_from_image_enclosure() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <enclosure url="https://img.example.com/cover.png" type="image/png" length="1000"/>
               <description>&lt;img src="https://other.example.com/inline.png"&gt;</description>
               </item>"#,
        ))
        .unwrap();
        assert_eq!(
            parsed.entries[0].cover_image.as_deref(),
            Some("https://img.example.com/cover.png")
        );
    }

    #[test]
    fn test_audio_enclosure_not_used_as_cover() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <enclosure url="https://cdn.example.com/ep.mp3" type="audio/mpeg" length="1000"/>
               </item>"#,
        ))
        .unwrap();
        assert!(parsed.entries[0].cover_image.is_none());
    }

    #[test]
    fn test_cover_from_media_content() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <media:content url="https://img.example.com/photo.jpg"/>
               </item>"#,
        ))
        .unwrap();
        assert_eq!(
            parsed.entries[0].cover_image.as_deref(),
            Some("https://img.example.com/photo.jpg")
        );
    }

    #[test]
    fn test_cover_from_media_thumbnail() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <media:thumbnail url="https://img.example.com/thumb.jpg"/>
               </item>"#,
        ))
        .unwrap();
        assert_eq!(
            parsed.entries[0].cover_image.as_deref(),
            Some("https://img.example.com/thumb.jpg")
        );
    }

    #[test]
    fn test_cover_from_description_img() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <description>&lt;p&gt;hello&lt;/p&gt;&lt;img src="https://img.example.com/inline.gif" alt=""&gt;</description>
               </item>"#,
        ))
        .unwrap();
        assert_eq!(
            parsed.entries[0].cover_image.as_deref(),
            Some("https://img.example.com/inline.gif")
        );
    }

    #[test]
    fn test_relative_img_src_rejected() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <description>&lt;img src="/images/cover.png"&gt;</description>
               </item>"#,
        ))
        .unwrap();
        assert!(parsed.entries[0].cover_image.is_none());
    }

    #[test]
    fn test_published_timestamp_used() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
               </item>"#,
        ))
        .unwrap();
        assert_eq!(parsed.entries[0].published_at, 1704067200);
    }

    #[test]
    fn test_synthesized_timestamps_preserve_feed_order() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>a</guid><title>A</title></item>
               <item><guid>b</guid><title>B</title></item>
               <item><guid>c</guid><title>C</title></item>"#,
        ))
        .unwrap();
        let ts: Vec<i64> = parsed.entries.iter().map(|e| e.published_at).collect();
        assert!(
            ts[0] > ts[1] && ts[1] > ts[2],
            "earlier-in-feed entries sort first under published DESC: {ts:?}"
        );
    }

    #[test]
    fn test_author_and_categories() {
        let parsed = parse_feed(&rss(
            r#"<item><guid>1</guid><title>A</title>
               <author>jane@example.com (Jane Doe)</author>
               <category>rust</category><category>feeds</category>
               </item>"#,
        ))
        .unwrap();
        let entry = &parsed.entries[0];
        assert!(entry.author.is_some());
        assert_eq!(entry.categories, vec!["rust", "feeds"]);
    }

    #[test]
    fn test_malformed_input_is_error() {
        assert!(parse_feed(b"this is not xml at all").is_err());
    }

    #[test]
    fn test_atom_feed_parses() {
        let atom = br#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <id>urn:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <id>urn:entry:1</id>
    <title>First</title>
    <link href="https://example.com/1"/>
    <updated>2024-01-01T00:00:00Z</updated>
  </entry>
</feed>"#;
        let parsed = parse_feed(atom).unwrap();
        assert_eq!(parsed.meta.title, "Atom Feed");
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].dedup_key(), Some("urn:entry:1"));
        // updated is used when published is absent
        assert_eq!(parsed.entries[0].published_at, 1704067200);
    }
}
