// src/telemetry.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scout_runs_total", "Pipeline runs started.");
        describe_counter!(
            "scout_ingest_articles_total",
            "Candidate articles parsed from sources."
        );
        describe_counter!("scout_articles_new_total", "Articles inserted after dedup.");
        describe_counter!(
            "scout_articles_duplicate_total",
            "Articles skipped as fingerprint duplicates."
        );
        describe_counter!("scout_source_errors_total", "Source fetch/parse errors.");
        describe_counter!(
            "scout_classify_requests_total",
            "Articles submitted for classification."
        );
        describe_counter!(
            "scout_classify_cache_hits_total",
            "Classifications served from the cache."
        );
        describe_counter!(
            "scout_classify_failures_total",
            "Articles marked classification-failed."
        );
        describe_counter!("scout_events_created_total", "Strategic events persisted.");
        describe_histogram!("scout_ingest_parse_ms", "Source parse time in milliseconds.");
        describe_gauge!(
            "scout_pipeline_last_run_ts",
            "Unix ts when the pipeline last finished a run."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder.
    pub fn init() -> Self {
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");
        ensure_metrics_described();
        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
