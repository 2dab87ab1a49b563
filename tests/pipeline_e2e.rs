// tests/pipeline_e2e.rs
// End-to-end runs over fixture fetchers and a scripted classifier provider.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scout_intel::classify::provider::{ClassifierProvider, ClassifyRequest};
use scout_intel::classify::{EventCategory, EventClassifier};
use scout_intel::config::classifier::ClassifierConfig;
use scout_intel::config::{
    CompetitorConfig, CompetitorDef, FetchSettings, SourceDef, SourceKind,
};
use scout_intel::error::{ClassifyError, FetchError};
use scout_intel::fingerprint::fingerprint;
use scout_intel::ingest::types::{CandidateArticle, SourceFetcher, SourceSpec};
use scout_intel::pipeline::{Pipeline, RunPhase};
use scout_intel::store::{EventFilter, NewArticle, Store};

fn candidate(title: &str, body: &str) -> CandidateArticle {
    CandidateArticle {
        title: title.to_string(),
        body: body.to_string(),
        url: format!("https://example.com/{}", title.to_lowercase().replace(' ', "-")),
        published_at: None,
    }
}

/// Fetcher double returning a fixed batch for every source of its kind.
struct FixtureFetcher {
    kind: SourceKind,
    batch: Vec<CandidateArticle>,
}

#[async_trait]
impl SourceFetcher for FixtureFetcher {
    async fn fetch(&self, _source: &SourceSpec) -> Result<Vec<CandidateArticle>, FetchError> {
        Ok(self.batch.clone())
    }
    fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// Fetcher double that always fails, for skip-and-continue coverage.
struct BrokenFetcher {
    kind: SourceKind,
}

#[async_trait]
impl SourceFetcher for BrokenFetcher {
    async fn fetch(&self, _source: &SourceSpec) -> Result<Vec<CandidateArticle>, FetchError> {
        Err(FetchError::Status(503))
    }
    fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// Provider double scripted by article content markers.
struct ScriptedProvider;

#[async_trait]
impl ClassifierProvider for ScriptedProvider {
    async fn complete(&self, req: &ClassifyRequest) -> Result<String, ClassifyError> {
        let payload = if req.user.contains("launches") {
            r#"{"category": "feature_launch", "confidence": 0.92, "impact": "high",
                "entities": ["Copilot Insights"], "summary": "Feature launch."}"#
        } else if req.user.contains("pricing") {
            r#"{"category": "pricing_change", "confidence": 0.81, "impact": "medium",
                "entities": ["Growth tier"], "summary": "Pricing change."}"#
        } else if req.user.contains("partnership") {
            r#"{"category": "partnership", "confidence": 0.75, "impact": "medium",
                "entities": ["Northwind"], "summary": "Partnership."}"#
        } else {
            r#"{"category": "other", "confidence": 0.3, "impact": "low",
                "entities": [], "summary": "Not actionable."}"#
        };
        Ok(payload.to_string())
    }
    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn two_source_config() -> CompetitorConfig {
    CompetitorConfig {
        fetch: FetchSettings {
            rate_limit_secs: 0.0,
            ..FetchSettings::default()
        },
        competitors: vec![CompetitorDef {
            name: "Acme".into(),
            slug: None,
            vertical: "saas-analytics".into(),
            sources: vec![
                SourceDef {
                    kind: SourceKind::Rss,
                    endpoint: "https://acme.example/feed".into(),
                    selector: None,
                },
                SourceDef {
                    kind: SourceKind::Html,
                    endpoint: "https://acme.example/blog".into(),
                    selector: Some("article".into()),
                },
            ],
        }],
    }
}

fn pipeline_with(
    store: &Arc<Store>,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    enabled: bool,
) -> Pipeline {
    let classifier = Arc::new(EventClassifier::new(
        Arc::new(ScriptedProvider),
        store.clone(),
        ClassifierConfig {
            enabled,
            ..ClassifierConfig::default()
        },
    ));
    Pipeline::with_fetchers(
        store.clone(),
        classifier,
        FetchSettings {
            rate_limit_secs: 0.0,
            ..FetchSettings::default()
        },
        fetchers,
    )
}

#[tokio::test]
async fn full_run_reports_expected_counts() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.sync_config(&two_source_config()).unwrap();
    let sources = store.list_active_sources().unwrap();

    // One article is already stored (and settled) from an earlier run; the
    // HTML source re-fetches identical content for it.
    let dup = candidate("Acme partnership with Northwind", "Joint integration announced today.");
    let dup_fp = fingerprint(&dup.title, &dup.body);
    let pre = store
        .insert_article_if_new(&NewArticle {
            source_id: sources[1].id,
            title: &dup.title,
            body: &dup.body,
            url: &dup.url,
            published_at: None,
            fingerprint: &dup_fp,
        })
        .unwrap();
    assert!(pre.inserted);
    store.mark_article_classified(pre.id).unwrap();

    let rss_batch = vec![
        candidate("Acme launches Copilot Insights", "A new analytics layer ships today."),
        candidate("Acme pricing update", "The Growth tier moves to usage pricing."),
        candidate("Acme weekly digest", "A roundup of community posts."),
    ];
    let html_batch = vec![
        candidate("Acme partnership expansion", "Another partnership with DataBridge."),
        dup.clone(),
    ];

    let pipeline = pipeline_with(
        &store,
        vec![
            Arc::new(FixtureFetcher {
                kind: SourceKind::Rss,
                batch: rss_batch,
            }),
            Arc::new(FixtureFetcher {
                kind: SourceKind::Html,
                batch: html_batch,
            }),
        ],
        true,
    );

    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.sources_attempted, 2);
    assert_eq!(summary.sources_failed, 0);
    assert_eq!(summary.articles_fetched, 5);
    assert_eq!(summary.articles_new, 4);
    assert_eq!(summary.articles_duplicate, 1);
    assert_eq!(summary.articles_classified, 4);
    assert_eq!(summary.articles_failed, 0);
    assert_eq!(summary.events_created, 3);
    assert_eq!(summary.phase, RunPhase::Completed);

    let events = store.query_events(&EventFilter::default()).unwrap();
    assert_eq!(events.len(), 3);
    let mut categories: Vec<&str> = events.iter().map(|e| e.category.as_str()).collect();
    categories.sort_unstable();
    assert_eq!(
        categories,
        ["feature_launch", "partnership", "pricing_change"]
    );
}

#[tokio::test]
async fn rerun_over_unchanged_sources_is_idempotent() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.sync_config(&two_source_config()).unwrap();

    let batch = vec![
        candidate("Acme launches Copilot Insights", "A new analytics layer ships today."),
        candidate("Acme pricing update", "The Growth tier moves to usage pricing."),
    ];
    let fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
        Arc::new(FixtureFetcher {
            kind: SourceKind::Rss,
            batch,
        }),
        Arc::new(FixtureFetcher {
            kind: SourceKind::Html,
            batch: vec![],
        }),
    ];

    let pipeline = pipeline_with(&store, fetchers, false);

    let first = pipeline.run_fetch_only(&CancellationToken::new()).await.unwrap();
    assert_eq!(first.articles_new, 2);
    assert_eq!(first.articles_duplicate, 0);

    let second = pipeline.run_fetch_only(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.articles_new, 0);
    assert_eq!(second.articles_duplicate, 2);
    assert_eq!(second.phase, RunPhase::Completed);
}

#[tokio::test]
async fn one_broken_source_does_not_abort_the_run() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.sync_config(&two_source_config()).unwrap();

    let fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
        Arc::new(BrokenFetcher {
            kind: SourceKind::Rss,
        }),
        Arc::new(FixtureFetcher {
            kind: SourceKind::Html,
            batch: vec![candidate(
                "Acme launches Copilot Insights",
                "A new analytics layer ships today.",
            )],
        }),
    ];

    let pipeline = pipeline_with(&store, fetchers, false);
    let summary = pipeline.run_fetch_only(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.sources_attempted, 2);
    assert_eq!(summary.sources_failed, 1);
    assert_eq!(summary.articles_new, 1);
    assert_eq!(summary.phase, RunPhase::CompletedWithErrors);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("503"));
}

#[tokio::test]
async fn classify_only_processes_stored_backlog() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.sync_config(&two_source_config()).unwrap();
    let source_id = store.list_active_sources().unwrap()[0].id;

    for (title, body) in [
        ("Acme launches Copilot Insights", "A new analytics layer."),
        ("Acme weekly digest", "Community posts roundup."),
    ] {
        let fp = fingerprint(title, body);
        store
            .insert_article_if_new(&NewArticle {
                source_id,
                title,
                body,
                url: "https://acme.example/blog/x",
                published_at: None,
                fingerprint: &fp,
            })
            .unwrap();
    }

    let pipeline = pipeline_with(&store, vec![], true);
    let summary = pipeline
        .run_classify_only(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.sources_attempted, 0);
    assert_eq!(summary.articles_fetched, 0);
    assert_eq!(summary.articles_classified, 2);
    assert_eq!(summary.events_created, 1);
    let events = store.query_events(&EventFilter::default()).unwrap();
    assert_eq!(events[0].category, EventCategory::FeatureLaunch);
}

#[tokio::test]
async fn cancelled_run_fetches_nothing_but_completes() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.sync_config(&two_source_config()).unwrap();

    let pipeline = pipeline_with(
        &store,
        vec![Arc::new(FixtureFetcher {
            kind: SourceKind::Rss,
            batch: vec![candidate("Acme launches X", "Body text.")],
        })],
        false,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = pipeline.run(&cancel).await.unwrap();
    assert_eq!(summary.sources_attempted, 0);
    assert_eq!(summary.articles_fetched, 0);
}
