// src/pipeline.rs
// Pipeline orchestrator: drives fetch -> dedup -> classify -> persist for one
// run and reports a summary. Per-source and per-article failures are recorded
// and skipped; only storage failures abort a run. Partial progress is always
// committed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::classify::{ClassifyOutcome, EventClassifier};
use crate::config::FetchSettings;
use crate::error::StoreError;
use crate::fingerprint::fingerprint;
use crate::ingest::html::HtmlFetcher;
use crate::ingest::rate_limit::HostRateLimiter;
use crate::ingest::rss::RssFetcher;
use crate::ingest::types::{CandidateArticle, SourceFetcher, SourceSpec};
use crate::store::{NewArticle, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Started,
    Fetching,
    Deduping,
    Classifying,
    Completed,
    CompletedWithErrors,
}

/// Structured counts for one run, display-ready for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub phase: RunPhase,
    pub sources_attempted: usize,
    pub sources_failed: usize,
    pub articles_fetched: usize,
    pub articles_new: usize,
    pub articles_duplicate: usize,
    pub articles_classified: usize,
    pub articles_failed: usize,
    pub cache_hits: usize,
    pub events_created: usize,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    fn started() -> Self {
        Self {
            phase: RunPhase::Started,
            sources_attempted: 0,
            sources_failed: 0,
            articles_fetched: 0,
            articles_new: 0,
            articles_duplicate: 0,
            articles_classified: 0,
            articles_failed: 0,
            cache_hits: 0,
            events_created: 0,
            errors: Vec::new(),
            elapsed_ms: 0,
        }
    }

    fn finish(&mut self, t0: Instant) {
        self.elapsed_ms = t0.elapsed().as_millis() as u64;
        self.phase = if self.errors.is_empty() {
            RunPhase::Completed
        } else {
            RunPhase::CompletedWithErrors
        };
        gauge!("scout_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        counter!("scout_runs_total").increment(1);
    }
}

pub struct Pipeline {
    store: Arc<Store>,
    classifier: Arc<EventClassifier>,
    limiter: Arc<HostRateLimiter>,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    settings: FetchSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        classifier: Arc<EventClassifier>,
        settings: FetchSettings,
    ) -> Self {
        crate::telemetry::ensure_metrics_described();

        let limiter = Arc::new(HostRateLimiter::new(
            Duration::from_secs_f64(settings.rate_limit_secs.max(0.0)),
            settings.request_budget,
        ));
        let client = reqwest::Client::builder()
            .user_agent("scout-intel/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");

        let fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
            Arc::new(RssFetcher::new(
                client.clone(),
                limiter.clone(),
                settings.min_content_chars,
            )),
            Arc::new(HtmlFetcher::new(
                client,
                limiter.clone(),
                settings.min_content_chars,
            )),
        ];

        Self {
            store,
            classifier,
            limiter,
            fetchers,
            settings,
        }
    }

    /// Test seam: swap in arbitrary fetchers (fixtures, failing doubles).
    pub fn with_fetchers(
        store: Arc<Store>,
        classifier: Arc<EventClassifier>,
        settings: FetchSettings,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
    ) -> Self {
        crate::telemetry::ensure_metrics_described();
        let limiter = Arc::new(HostRateLimiter::new(
            Duration::from_secs_f64(settings.rate_limit_secs.max(0.0)),
            settings.request_budget,
        ));
        Self {
            store,
            classifier,
            limiter,
            fetchers,
            settings,
        }
    }

    /// One full run over the active source configuration.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, StoreError> {
        let t0 = Instant::now();
        let mut summary = RunSummary::started();
        self.fetch_and_dedup(&mut summary, cancel).await?;
        self.classify_batch(&mut summary, cancel).await?;
        summary.finish(t0);
        Ok(summary)
    }

    /// Incremental mode: stop after dedup, leave articles pending.
    pub async fn run_fetch_only(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, StoreError> {
        let t0 = Instant::now();
        let mut summary = RunSummary::started();
        self.fetch_and_dedup(&mut summary, cancel).await?;
        summary.finish(t0);
        Ok(summary)
    }

    /// Incremental mode: classify already-stored unclassified articles.
    pub async fn run_classify_only(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, StoreError> {
        let t0 = Instant::now();
        let mut summary = RunSummary::started();
        self.classify_batch(&mut summary, cancel).await?;
        summary.finish(t0);
        Ok(summary)
    }

    fn fetcher_for(&self, kind: crate::config::SourceKind) -> Option<&Arc<dyn SourceFetcher>> {
        self.fetchers.iter().find(|f| f.kind() == kind)
    }

    async fn fetch_and_dedup(
        &self,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        summary.phase = RunPhase::Fetching;
        self.limiter.reset_budget();

        let sources = self.store.list_active_sources()?;
        let mut candidates: Vec<(i64, CandidateArticle)> = Vec::new();

        for src in sources {
            if cancel.is_cancelled() {
                tracing::info!("run cancelled between source fetches");
                break;
            }
            summary.sources_attempted += 1;

            let Some(fetcher) = self.fetcher_for(src.kind) else {
                summary.sources_failed += 1;
                summary
                    .errors
                    .push(format!("{}: no fetcher for kind {:?}", src.endpoint, src.kind));
                continue;
            };

            let spec = SourceSpec {
                id: src.id,
                competitor: src.competitor_name.clone(),
                kind: src.kind,
                endpoint: src.endpoint.clone(),
                selector: src.selector.clone(),
            };

            match fetcher.fetch(&spec).await {
                Ok(batch) => {
                    tracing::info!(
                        source = %src.endpoint,
                        competitor = %src.competitor_name,
                        articles = batch.len(),
                        "fetched source"
                    );
                    summary.articles_fetched += batch.len();
                    candidates.extend(batch.into_iter().map(|a| (src.id, a)));
                    self.store.touch_source_fetched(src.id)?;
                }
                Err(e) => {
                    counter!("scout_source_errors_total").increment(1);
                    tracing::warn!(source = %src.endpoint, error = %e, "source fetch failed");
                    summary.sources_failed += 1;
                    summary.errors.push(format!("{}: {e}", src.endpoint));
                }
            }
        }

        summary.phase = RunPhase::Deduping;
        for (source_id, art) in candidates {
            let fp = fingerprint(&art.title, &art.body);
            let res = self.store.insert_article_if_new(&NewArticle {
                source_id,
                title: &art.title,
                body: &art.body,
                url: &art.url,
                published_at: art.published_at,
                fingerprint: &fp,
            })?;
            if res.inserted {
                summary.articles_new += 1;
                counter!("scout_articles_new_total").increment(1);
            } else {
                summary.articles_duplicate += 1;
                counter!("scout_articles_duplicate_total").increment(1);
            }
        }
        Ok(())
    }

    async fn classify_batch(
        &self,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        if !self.classifier.enabled() {
            tracing::info!("classification disabled, leaving articles pending");
            return Ok(());
        }
        summary.phase = RunPhase::Classifying;

        let batch = self
            .store
            .list_unclassified_articles(self.classifier.batch_limit(), self.classifier.retry_failed())?;

        let workers = self.settings.max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set: JoinSet<Result<ClassifyOutcome, StoreError>> = JoinSet::new();

        for article in batch {
            if cancel.is_cancelled() {
                tracing::info!("run cancelled between article classifications");
                break;
            }
            let sem = semaphore.clone();
            let classifier = self.classifier.clone();
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                classifier.classify_article(&article).await
            });
        }

        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(res) => res?,
                Err(e) => {
                    summary.errors.push(format!("classification task: {e}"));
                    continue;
                }
            };
            match outcome {
                ClassifyOutcome::Event { cache_hit, .. } => {
                    summary.articles_classified += 1;
                    summary.events_created += 1;
                    summary.cache_hits += cache_hit as usize;
                }
                ClassifyOutcome::Discarded { cache_hit } => {
                    summary.articles_classified += 1;
                    summary.cache_hits += cache_hit as usize;
                }
                ClassifyOutcome::Failed { reason } => {
                    summary.articles_failed += 1;
                    summary.errors.push(reason);
                }
            }
        }
        Ok(())
    }
}
