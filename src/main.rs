//! Scout Intel binary entrypoint: one-shot pipeline runs (`run`, `fetch`,
//! `classify`) or the Axum HTTP service (`serve`, the default).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scout_intel::classify::provider::{ClassifierProvider, MockProvider, OpenAiProvider};
use scout_intel::classify::EventClassifier;
use scout_intel::config::classifier::ClassifierConfig;
use scout_intel::config::CompetitorConfig;
use scout_intel::telemetry::Metrics;
use scout_intel::pipeline::Pipeline;
use scout_intel::store::Store;
use scout_intel::{api, AppState};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scout_intel=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn build_provider(cfg: &ClassifierConfig) -> Arc<dyn ClassifierProvider> {
    // AI_TEST_MODE=mock wires a canned payload; handy for local smoke runs.
    if std::env::var("AI_TEST_MODE").map(|v| v == "mock").unwrap_or(false) {
        return Arc::new(MockProvider::new(
            r#"{"category": "other", "confidence": 0.3, "impact": "low",
                "entities": [], "summary": "Mock classification."}"#,
        ));
    }
    Arc::new(OpenAiProvider::new(cfg.api_key.clone(), cfg.model.clone()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let competitors = CompetitorConfig::load_default()?;
    competitors.validate()?;
    let classifier_cfg = ClassifierConfig::load_default();

    let db_path = std::env::var("SCOUT_DB_PATH").unwrap_or_else(|_| "data/scout.db".to_string());
    let store = Arc::new(Store::open(&db_path)?);
    store.sync_config(&competitors)?;
    tracing::info!(db = %db_path, competitors = competitors.competitors.len(), "store ready");

    let provider = build_provider(&classifier_cfg);
    let classifier = Arc::new(EventClassifier::new(
        provider,
        store.clone(),
        classifier_cfg,
    ));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        classifier,
        competitors.fetch.clone(),
    ));

    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    let cancel = CancellationToken::new();

    match mode.as_str() {
        "run" => {
            let summary = pipeline.run(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "fetch" => {
            let summary = pipeline.run_fetch_only(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "classify" => {
            let summary = pipeline.run_classify_only(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "serve" => {
            let metrics = Metrics::init();
            let state = AppState {
                pipeline,
                store,
            };
            let router = api::create_router(state).merge(metrics.router());

            let addr =
                std::env::var("SCOUT_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(addr = %addr, "listening");
            axum::serve(listener, router).await?;
        }
        other => {
            anyhow::bail!("unknown mode {other:?}; expected run, fetch, classify, or serve");
        }
    }
    Ok(())
}
