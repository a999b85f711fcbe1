use crate::types::{AggregatorError, InputItem, Result};
use crate::utils::url::canonicalize;
use chrono::Utc;
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

/// Turns RSS or Atom documents into observed entries.
#[derive(Debug, Default)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse at most `max_entries` entries. Entries without a link are
    /// dropped, and an entry whose canonical URL already appeared earlier in
    /// the same document is skipped.
    pub fn parse_feed(&self, content: &str, max_entries: usize) -> Result<Vec<InputItem>> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

        let mut seen_urls = HashSet::new();
        let mut entries = Vec::new();

        for entry in feed.entries.into_iter().take(max_entries) {
            let Some(item) = Self::parse_entry(entry) else {
                continue;
            };
            if !seen_urls.insert(canonicalize(&item.url)) {
                debug!("Skipping duplicate entry with URL: {}", item.url);
                continue;
            }
            entries.push(item);
        }

        info!("Parsed feed with {} entries", entries.len());
        Ok(entries)
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<InputItem> {
        let url = entry
            .links
            .first()
            .map(|link| link.href.trim().to_string())
            .filter(|href| !href.is_empty())?;

        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|title| !title.is_empty());

        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        Some(InputItem { url, title, published_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <description>Example feed</description>
    <item>
      <title>First post</title>
      <link>https://example.com/posts/1?utm_source=rss</link>
      <pubDate>Tue, 02 Jan 2024 09:00:00 +0900</pubDate>
    </item>
    <item>
      <title>No link here</title>
    </item>
    <item>
      <title>Duplicate of first</title>
      <link>https://example.com/posts/1</link>
    </item>
    <item>
      <link>https://example.com/posts/2</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_entries_and_drops_linkless_ones() {
        let entries = FeedParser::new().parse_feed(RSS, 50).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].url, "https://example.com/posts/1?utm_source=rss");
        assert_eq!(entries[0].title.as_deref(), Some("First post"));
        assert_eq!(
            entries[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );

        assert_eq!(entries[1].url, "https://example.com/posts/2");
        assert_eq!(entries[1].title, None);
        assert_eq!(entries[1].published_at, None);
    }

    #[test]
    fn respects_entry_limit() {
        let entries = FeedParser::new().parse_feed(RSS, 1).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn parses_atom_with_updated_fallback() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <id>urn:example</id>
  <updated>2024-03-01T12:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:example:1</id>
    <link href="https://example.org/a"/>
    <updated>2024-03-01T12:00:00Z</updated>
  </entry>
</feed>"#;
        let entries = FeedParser::new().parse_feed(atom, 50).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn rejects_non_feed_content() {
        let result = FeedParser::new().parse_feed("<html><body>nope</body></html>", 50);
        assert!(matches!(result, Err(AggregatorError::Parse(_))));
    }
}
