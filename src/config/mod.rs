// src/config/mod.rs
// Competitor/source configuration document. Loaded once at startup and passed
// by reference into the orchestrator; no process-wide mutable state.

pub mod classifier;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "SCOUT_COMPETITORS_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Html,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Html => "html",
        }
    }
}

/// One fetch endpoint belonging to a competitor. `selector` is the CSS rule
/// locating article blocks on HTML sources; RSS sources leave it empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDef {
    pub kind: SourceKind,
    pub endpoint: String,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorDef {
    pub name: String,
    /// Stable identifier; derived from `name` when absent.
    #[serde(default)]
    pub slug: Option<String>,
    pub vertical: String,
    #[serde(default)]
    pub sources: Vec<SourceDef>,
}

impl CompetitorDef {
    pub fn slug(&self) -> String {
        self.slug.clone().unwrap_or_else(|| slugify(&self.name))
    }
}

/// Fetch-side tuning knobs, shipped alongside the source list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Minimum delay between consecutive requests to the same host.
    #[serde(default = "default_rate_limit_secs")]
    pub rate_limit_secs: f64,
    /// Hard cap on outbound fetch requests per run; excess sources are
    /// skipped with a recorded warning.
    #[serde(default = "default_request_budget")]
    pub request_budget: u32,
    /// Articles with a cleaned body shorter than this are dropped at fetch.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
    /// Upper bound on concurrent classification workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_rate_limit_secs() -> f64 {
    1.0
}
fn default_request_budget() -> u32 {
    50
}
fn default_min_content_chars() -> usize {
    100
}
fn default_max_workers() -> usize {
    4
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            rate_limit_secs: default_rate_limit_secs(),
            request_budget: default_request_budget(),
            min_content_chars: default_min_content_chars(),
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompetitorConfig {
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub competitors: Vec<CompetitorDef>,
}

impl CompetitorConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading competitor config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, ext.as_str())
    }

    /// Load using env var + fallbacks:
    /// 1) $SCOUT_COMPETITORS_PATH
    /// 2) config/competitors.toml
    /// 3) config/competitors.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("SCOUT_COMPETITORS_PATH points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/competitors.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/competitors.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    /// Duplicate slugs or endpoints make source ownership ambiguous; reject
    /// the document rather than guessing.
    pub fn validate(&self) -> Result<()> {
        let mut slugs = std::collections::BTreeSet::new();
        let mut endpoints = std::collections::BTreeSet::new();
        for c in &self.competitors {
            if c.name.trim().is_empty() {
                return Err(anyhow!("competitor with empty name"));
            }
            if !slugs.insert(c.slug()) {
                return Err(anyhow!("duplicate competitor slug: {}", c.slug()));
            }
            for s in &c.sources {
                if !endpoints.insert(s.endpoint.clone()) {
                    return Err(anyhow!("duplicate source endpoint: {}", s.endpoint));
                }
            }
        }
        Ok(())
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<CompetitorConfig> {
    let try_toml = hint_ext == "toml" || s.contains("[[competitors]]");
    if try_toml {
        if let Ok(v) = toml::from_str::<CompetitorConfig>(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str::<CompetitorConfig>(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = toml::from_str::<CompetitorConfig>(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported competitor config format"))
}

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
