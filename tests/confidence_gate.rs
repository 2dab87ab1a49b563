// tests/confidence_gate.rs
// The 0.5 confidence gate, exercised through the classifier with a mock
// provider: below the gate nothing persists, at the gate an event persists.

use std::sync::Arc;

use scout_intel::classify::provider::MockProvider;
use scout_intel::classify::EventClassifier;
use scout_intel::config::classifier::ClassifierConfig;
use scout_intel::config::{CompetitorConfig, CompetitorDef, FetchSettings, SourceDef, SourceKind};
use scout_intel::fingerprint::fingerprint;
use scout_intel::store::{ArticleStatus, EventFilter, NewArticle, Store, StoredArticle};

fn seeded_store() -> (Arc<Store>, i64) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let cfg = CompetitorConfig {
        fetch: FetchSettings::default(),
        competitors: vec![CompetitorDef {
            name: "Acme".into(),
            slug: None,
            vertical: "saas-analytics".into(),
            sources: vec![SourceDef {
                kind: SourceKind::Rss,
                endpoint: "https://acme.example/feed".into(),
                selector: None,
            }],
        }],
    };
    store.sync_config(&cfg).unwrap();
    let source_id = store.list_active_sources().unwrap()[0].id;
    (store, source_id)
}

fn enabled_cfg() -> ClassifierConfig {
    ClassifierConfig {
        enabled: true,
        ..ClassifierConfig::default()
    }
}

fn stored_article(store: &Store, source_id: i64, title: &str) -> StoredArticle {
    let body = format!("{title} body text");
    let fp = fingerprint(title, &body);
    store
        .insert_article_if_new(&NewArticle {
            source_id,
            title,
            body: &body,
            url: "https://acme.example/blog/x",
            published_at: None,
            fingerprint: &fp,
        })
        .unwrap();
    store
        .list_unclassified_articles(100, false)
        .unwrap()
        .into_iter()
        .find(|a| a.title == title)
        .expect("article just inserted")
}

fn payload(category: &str, confidence: f64) -> String {
    format!(
        r#"{{"category": "{category}", "confidence": {confidence}, "impact": "medium",
            "entities": ["Acme"], "summary": "Something happened."}}"#
    )
}

#[tokio::test]
async fn just_below_the_gate_no_event_persists() {
    let (store, source_id) = seeded_store();
    let provider = Arc::new(MockProvider::new(payload("feature_launch", 0.49999)));
    let classifier = EventClassifier::new(provider, store.clone(), enabled_cfg());

    let article = stored_article(&store, source_id, "Near miss");
    classifier.classify_article(&article).await.unwrap();

    assert!(store.query_events(&EventFilter::default()).unwrap().is_empty());
    // the article is settled, not retryable
    assert!(store.list_unclassified_articles(10, true).unwrap().is_empty());
}

#[tokio::test]
async fn exactly_at_the_gate_an_event_persists() {
    let (store, source_id) = seeded_store();
    let provider = Arc::new(MockProvider::new(payload("feature_launch", 0.5)));
    let classifier = EventClassifier::new(provider, store.clone(), enabled_cfg());

    let article = stored_article(&store, source_id, "On the line");
    classifier.classify_article(&article).await.unwrap();

    let events = store.query_events(&EventFilter::default()).unwrap();
    assert_eq!(events.len(), 1);
    assert!((events[0].confidence - 0.5).abs() < 1e-12);
    assert_eq!(events[0].article_id, article.id);
}

#[tokio::test]
async fn other_category_is_discarded_even_with_high_confidence() {
    let (store, source_id) = seeded_store();
    let provider = Arc::new(MockProvider::new(payload("other", 0.95)));
    let classifier = EventClassifier::new(provider, store.clone(), enabled_cfg());

    let article = stored_article(&store, source_id, "Culture post");
    classifier.classify_article(&article).await.unwrap();

    assert!(store.query_events(&EventFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn event_marks_parent_article_classified() {
    let (store, source_id) = seeded_store();
    let provider = Arc::new(MockProvider::new(payload("partnership", 0.8)));
    let classifier = EventClassifier::new(provider, store.clone(), enabled_cfg());

    let article = stored_article(&store, source_id, "Joint venture");
    classifier.classify_article(&article).await.unwrap();

    let remaining = store.list_unclassified_articles(10, true).unwrap();
    assert!(remaining.is_empty());
    let recent = store.recent_articles("acme", 10).unwrap();
    assert_eq!(recent[0].status, ArticleStatus::Classified);
}
