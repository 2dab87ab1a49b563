// tests/concurrent_dedup.rs
// Concurrent workers racing on identical content must leave exactly one
// stored article and at most one event.

use std::sync::Arc;

use scout_intel::classify::provider::MockProvider;
use scout_intel::classify::EventClassifier;
use scout_intel::config::classifier::ClassifierConfig;
use scout_intel::config::{CompetitorConfig, CompetitorDef, FetchSettings, SourceDef, SourceKind};
use scout_intel::fingerprint::fingerprint;
use scout_intel::store::{EventFilter, NewArticle, Store};

fn seeded_store() -> (Arc<Store>, Vec<i64>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let cfg = CompetitorConfig {
        fetch: FetchSettings::default(),
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
                    selector: None,
                },
            ],
        }],
    };
    store.sync_config(&cfg).unwrap();
    let ids = store
        .list_active_sources()
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    (store, ids)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_inserts_of_identical_content_store_one_article() {
    let (store, source_ids) = seeded_store();
    let title = "Acme launches Copilot Insights";
    let body = "The same announcement syndicated to two sources.";
    let fp = fingerprint(title, body);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let fp = fp.clone();
        // alternate between the two sources carrying the duplicate content
        let source_id = source_ids[i % source_ids.len()];
        handles.push(tokio::spawn(async move {
            store
                .insert_article_if_new(&NewArticle {
                    source_id,
                    title,
                    body,
                    url: "https://acme.example/blog/copilot",
                    published_at: None,
                    fingerprint: &fp,
                })
                .unwrap()
        }));
    }

    let mut inserted = 0;
    let mut ids = std::collections::BTreeSet::new();
    for h in handles {
        let res = h.await.unwrap();
        if res.inserted {
            inserted += 1;
        }
        ids.insert(res.id);
    }
    assert_eq!(inserted, 1, "exactly one insert wins the race");
    assert_eq!(ids.len(), 1, "every racer resolves to the same article row");
    assert_eq!(store.list_unclassified_articles(10, false).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_classification_yields_at_most_one_event() {
    let (store, source_ids) = seeded_store();
    let title = "Acme launches Copilot Insights";
    let body = "The same announcement syndicated to two sources.";
    let fp = fingerprint(title, body);
    store
        .insert_article_if_new(&NewArticle {
            source_id: source_ids[0],
            title,
            body,
            url: "https://acme.example/blog/copilot",
            published_at: None,
            fingerprint: &fp,
        })
        .unwrap();

    let provider = Arc::new(MockProvider::new(
        r#"{"category": "feature_launch", "confidence": 0.9, "impact": "high",
            "entities": ["Copilot Insights"], "summary": "Launch."}"#,
    ));
    let classifier = Arc::new(EventClassifier::new(
        provider,
        store.clone(),
        ClassifierConfig {
            enabled: true,
            ..ClassifierConfig::default()
        },
    ));

    // hammer the same stored article from several workers at once
    let article = store.list_unclassified_articles(1, false).unwrap().remove(0);
    let mut handles = Vec::new();
    for _ in 0..6 {
        let classifier = classifier.clone();
        let article = article.clone();
        handles.push(tokio::spawn(async move {
            classifier.classify_article(&article).await.unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let events = store.query_events(&EventFilter::default()).unwrap();
    assert_eq!(events.len(), 1, "at most one event per article");
}
