// src/ingest/rss.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::config::SourceKind;
use crate::error::FetchError;
use crate::ingest::rate_limit::HostRateLimiter;
use crate::ingest::types::{CandidateArticle, SourceFetcher, SourceSpec};

/// Feeds routinely publish hundreds of historical entries; only the freshest
/// slice is worth classifying.
const MAX_ENTRIES: usize = 20;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822_utc(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

pub struct RssFetcher {
    client: reqwest::Client,
    limiter: Arc<HostRateLimiter>,
    min_content_chars: usize,
}

impl RssFetcher {
    pub fn new(
        client: reqwest::Client,
        limiter: Arc<HostRateLimiter>,
        min_content_chars: usize,
    ) -> Self {
        Self {
            client,
            limiter,
            min_content_chars,
        }
    }

    fn parse_feed_str(&self, s: &str, feed_url: &str) -> Result<Vec<CandidateArticle>, FetchError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss =
            from_str(&xml_clean).map_err(|e| FetchError::Parse(format!("rss xml: {e}")))?;

        let mut out = Vec::with_capacity(rss.channel.item.len().min(MAX_ENTRIES));
        for it in rss.channel.item.into_iter().take(MAX_ENTRIES) {
            let title = crate::ingest::normalize_text(it.title.as_deref().unwrap_or("Untitled"));
            let body = crate::ingest::normalize_text(it.description.as_deref().unwrap_or_default());
            if body.chars().count() < self.min_content_chars {
                tracing::debug!(title = %title, "skipping short rss entry");
                continue;
            }

            out.push(CandidateArticle {
                title,
                body,
                url: it.link.unwrap_or_else(|| feed_url.to_string()),
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822_utc),
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("scout_ingest_parse_ms").record(ms);
        counter!("scout_ingest_articles_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceFetcher for RssFetcher {
    async fn fetch(&self, source: &SourceSpec) -> Result<Vec<CandidateArticle>, FetchError> {
        self.limiter.acquire(&source.endpoint).await?;

        let resp = self.client.get(&source.endpoint).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        self.parse_feed_str(&body, &source.endpoint)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }
}

/// Feeds often carry HTML entities that are not valid XML entities; scrub the
/// usual suspects before handing the document to the XML parser.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FEED: &str = include_str!("../../tests/fixtures/feed_a.xml");

    fn fetcher(min_chars: usize) -> RssFetcher {
        RssFetcher::new(
            reqwest::Client::new(),
            Arc::new(HostRateLimiter::new(Duration::from_millis(0), 100)),
            min_chars,
        )
    }

    #[test]
    fn fixture_feed_parses() {
        let out = fetcher(10).parse_feed_str(FEED, "https://acme.example/feed").unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].title, "Acme launches Copilot Insights");
        assert!(out[0].url.starts_with("https://acme.example/blog/"));
        assert!(out[0].published_at.is_some());
    }

    #[test]
    fn short_entries_are_dropped() {
        let out = fetcher(5_000).parse_feed_str(FEED, "https://acme.example/feed").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = fetcher(0).parse_feed_str("<rss><channel>", "u").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn rfc2822_dates_become_utc() {
        let dt = parse_rfc2822_utc("Tue, 14 Jan 2025 09:30:00 +0100").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-01-14T08:30:00+00:00");
        assert!(parse_rfc2822_utc("not a date").is_none());
    }
}
