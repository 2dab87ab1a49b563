// src/ingest/types.rs
use chrono::{DateTime, Utc};

use crate::config::SourceKind;
use crate::error::FetchError;

/// Raw ingested unit as produced by a fetcher, before fingerprinting and
/// dedup. Value object: fetchers hold no references to it after returning.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CandidateArticle {
    pub title: String,
    /// Cleaned plain text (entities decoded, tags stripped).
    pub body: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Source descriptor handed to a fetcher for one fetch call.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub id: i64,
    pub competitor: String,
    pub kind: SourceKind,
    pub endpoint: String,
    pub selector: Option<String>,
}

/// One fetch produces a finite batch; a fresh call always re-reads the full
/// feed or page. Failures are per-source and never abort the run.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceSpec) -> Result<Vec<CandidateArticle>, FetchError>;
    fn kind(&self) -> SourceKind;
}
