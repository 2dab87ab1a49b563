// src/config/classifier.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_threshold() -> f64 {
    0.50
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_article_chars() -> usize {
    3000
}
fn default_batch_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub enabled: bool,
    /// "openai" (case-insensitive)
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY
    pub api_key: String,
    /// Confidence gate (inclusive). Events below it are discarded.
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    /// Transport retries before an article is marked classification-failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether later runs re-attempt articles already marked failed.
    /// Off by default: failed articles wait for operator intervention.
    #[serde(default)]
    pub retry_failed_articles: bool,
    /// Article text is truncated to this many chars in the request.
    #[serde(default = "default_max_article_chars")]
    pub max_article_chars: usize,
    /// Upper bound on unclassified articles pulled per run.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            model: default_model(),
            api_key: String::new(),
            confidence_threshold: default_threshold(),
            max_retries: default_max_retries(),
            retry_failed_articles: false,
            max_article_chars: default_max_article_chars(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl ClassifierConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: ClassifierConfig = serde_json::from_str(&data)?;

        // Normalize provider
        cfg.provider = cfg.provider.to_lowercase();

        // Resolve api key if "ENV"
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        // Sanitize the gate
        if !(0.0..=1.0).contains(&cfg.confidence_threshold) {
            cfg.confidence_threshold = default_threshold();
        }
        if cfg.max_article_chars == 0 {
            cfg.max_article_chars = default_max_article_chars();
        }

        Ok(cfg)
    }

    /// Load from $SCOUT_CLASSIFIER_PATH, falling back to
    /// config/classifier.json, falling back to a disabled default.
    pub fn load_default() -> Self {
        let path = env::var("SCOUT_CLASSIFIER_PATH")
            .unwrap_or_else(|_| "config/classifier.json".to_string());
        match Self::load_from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = ?e, path = %path, "classifier config unavailable, running disabled");
                Self::default()
            }
        }
    }
}
