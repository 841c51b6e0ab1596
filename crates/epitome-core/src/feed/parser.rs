use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;

use super::models::{FeedItem, FetchedFeed};
use crate::{Error, Result};

/// Simple pattern matching for extracting the first image URL from HTML
fn extract_first_image_url(html: &str) -> Option<String> {
    let html_lower = html.to_lowercase();

    let img_start = html_lower.find("<img")?;
    let remaining = &html[img_start..];
    let src_start = remaining.to_lowercase().find("src=")?;
    let src_remaining = &remaining[src_start + 4..];

    // src="url" or src='url'
    let quote_char = src_remaining.chars().next()?;
    if quote_char != '"' && quote_char != '\'' {
        return None;
    }
    let url_end = src_remaining[1..].find(quote_char)?;
    let url = &src_remaining[1..1 + url_end];

    // Tracking pixels and icons
    if url.contains("1x1") || url.contains("pixel") || url.contains("tracking") {
        return None;
    }
    Some(url.to_string())
}

/// Parse RSS/Atom/JSON feed content into normalized items.
///
/// Entries missing a date, title, link or summary are dropped; a malformed
/// entry never fails the whole feed.
pub fn parse_feed(content: &[u8]) -> Result<FetchedFeed> {
    let feed = parser::parse(content).map_err(|e| Error::Fetch(e.to_string()))?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());

    let total = feed.entries.len();
    let items: Vec<FeedItem> = feed.entries.into_iter().filter_map(normalize_entry).collect();

    if items.len() < total {
        tracing::debug!(
            dropped = total - items.len(),
            "Dropped feed entries with missing fields"
        );
    }

    Ok(FetchedFeed { title, items })
}

fn normalize_entry(entry: Entry) -> Option<FeedItem> {
    let published_at = entry
        .published
        .or(entry.updated)
        .map(DateTime::<Utc>::from)?;

    let title = non_empty(entry.title.map(|t| t.content))?;
    let link = non_empty(entry.links.first().map(|l| l.href.clone()))?;

    let html = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));
    let summary = non_empty(html.as_deref().map(html_to_text))?;

    let author = entry.authors.first().map(|a| a.name.clone());

    let image_url = entry
        .media
        .first()
        .and_then(|m| m.thumbnails.first())
        .map(|t| t.image.uri.clone())
        .or_else(|| {
            entry
                .media
                .first()
                .and_then(|m| m.content.first())
                .and_then(|c| c.url.as_ref())
                .map(|u| u.to_string())
        })
        .or_else(|| html.as_deref().and_then(extract_first_image_url));

    Some(FeedItem {
        published_at,
        title,
        link,
        summary,
        author,
        image_url,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Convert HTML content to plain text
fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 120)
        .unwrap_or_else(|_| html.to_string())
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Le Journal</title>
    <link>https://example.com</link>
    <description>News</description>
    <item>
      <title>Complete item</title>
      <link>https://example.com/a</link>
      <description>A full summary</description>
      <pubDate>Tue, 10 Sep 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No date</title>
      <link>https://example.com/b</link>
      <description>Missing the date</description>
    </item>
    <item>
      <link>https://example.com/c</link>
      <description>Missing the title</description>
      <pubDate>Tue, 10 Sep 2024 11:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_malformed_entries_are_dropped() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Le Journal"));
        assert_eq!(parsed.items.len(), 1);

        let item = &parsed.items[0];
        assert_eq!(item.title, "Complete item");
        assert_eq!(item.link, "https://example.com/a");
        assert_eq!(item.summary, "A full summary");
    }

    #[test]
    fn test_garbage_is_fetch_error() {
        let err = parse_feed(b"<html>not a feed").unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }

    #[test]
    fn test_extract_first_image_url() {
        let html = r#"<p>x</p><img class="a" src="https://img.example.com/p.jpg">"#;
        assert_eq!(
            extract_first_image_url(html).as_deref(),
            Some("https://img.example.com/p.jpg")
        );
        assert!(extract_first_image_url(r#"<img src="https://t.co/pixel.gif">"#).is_none());
    }
}
