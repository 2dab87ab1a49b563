// src/ingest/html.rs
// HTML variant of the fetcher: pull a listing/blog page and cut article
// blocks out of it with per-source CSS selector rules.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, histogram};
use scraper::{Html, Selector};

use crate::config::SourceKind;
use crate::error::FetchError;
use crate::ingest::rate_limit::HostRateLimiter;
use crate::ingest::types::{CandidateArticle, SourceFetcher, SourceSpec};

const DEFAULT_BLOCK_SELECTOR: &str = "article";
const TITLE_SELECTOR: &str = "h1, h2, h3";
const BODY_SELECTOR: &str = "p";
const LINK_SELECTOR: &str = "a[href]";

pub struct HtmlFetcher {
    client: reqwest::Client,
    limiter: Arc<HostRateLimiter>,
    min_content_chars: usize,
}

impl HtmlFetcher {
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

    /// Synchronous extraction; `Html` is not `Send`, so it must never live
    /// across an await point.
    fn parse_blocks(
        &self,
        html: &str,
        block_rule: &str,
        page_url: &str,
    ) -> Result<Vec<CandidateArticle>, FetchError> {
        let t0 = std::time::Instant::now();

        let block_sel = Selector::parse(block_rule)
            .map_err(|e| FetchError::Parse(format!("bad selector {block_rule:?}: {e}")))?;
        let title_sel = Selector::parse(TITLE_SELECTOR).unwrap();
        let body_sel = Selector::parse(BODY_SELECTOR).unwrap();
        let link_sel = Selector::parse(LINK_SELECTOR).unwrap();

        let base = reqwest::Url::parse(page_url)
            .map_err(|e| FetchError::Parse(format!("bad page url {page_url:?}: {e}")))?;

        let doc = Html::parse_document(html);
        let mut out = Vec::new();

        for block in doc.select(&block_sel) {
            let title = block
                .select(&title_sel)
                .next()
                .map(|el| crate::ingest::normalize_text(&el.text().collect::<String>()))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            let body_raw = block
                .select(&body_sel)
                .map(|el| el.text().collect::<String>())
                .collect::<Vec<_>>()
                .join(" ");
            let body = crate::ingest::normalize_text(&body_raw);
            if body.chars().count() < self.min_content_chars {
                tracing::debug!(title = %title, "skipping short html block");
                continue;
            }

            let url = block
                .select(&link_sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| base.join(href).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| page_url.to_string());

            out.push(CandidateArticle {
                title,
                body,
                url,
                // Listing pages carry no machine-readable publish date.
                published_at: None,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("scout_ingest_parse_ms").record(ms);
        counter!("scout_ingest_articles_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceFetcher for HtmlFetcher {
    async fn fetch(&self, source: &SourceSpec) -> Result<Vec<CandidateArticle>, FetchError> {
        self.limiter.acquire(&source.endpoint).await?;

        let resp = self.client.get(&source.endpoint).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;

        let rule = source.selector.as_deref().unwrap_or(DEFAULT_BLOCK_SELECTOR);
        self.parse_blocks(&body, rule, &source.endpoint)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }
}
