// src/classify/mod.rs
// Event classifier: turns one article into zero-or-one strategic event via
// the external language model, with a write-once cache in front of the
// endpoint and the confidence gate in front of the store.

pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::config::classifier::ClassifierConfig;
use crate::error::ClassifyError;
use crate::store::{NewEvent, Store, StoredArticle, EVENT_CONFIDENCE_FLOOR};
use self::provider::{ClassifierProvider, ClassifyRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    FeatureLaunch,
    PricingChange,
    Partnership,
    Other,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::FeatureLaunch => "feature_launch",
            EventCategory::PricingChange => "pricing_change",
            EventCategory::Partnership => "partnership",
            EventCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feature_launch" => Some(EventCategory::FeatureLaunch),
            "pricing_change" => Some(EventCategory::PricingChange),
            "partnership" => Some(EventCategory::Partnership),
            "other" => Some(EventCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::High => "high",
            ImpactLevel::Medium => "medium",
            ImpactLevel::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(ImpactLevel::High),
            "medium" => Some(ImpactLevel::Medium),
            "low" => Some(ImpactLevel::Low),
            _ => None,
        }
    }
}

/// Validated structured extraction returned by the endpoint. This is also
/// the cache payload: the raw reply is never stored, only this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: EventCategory,
    pub confidence: f64,
    pub impact: ImpactLevel,
    pub entities: Vec<String>,
    pub summary: String,
}

/// Parse and validate a raw endpoint reply against the extraction schema.
/// Anything off-schema is a `ClassifyError::Schema`: missing field, unknown
/// enum value, confidence outside [0, 1].
pub fn validate_payload(raw: &str) -> Result<Classification, ClassifyError> {
    let c: Classification =
        serde_json::from_str(raw).map_err(|e| ClassifyError::Schema(e.to_string()))?;
    if !c.confidence.is_finite() || !(0.0..=1.0).contains(&c.confidence) {
        return Err(ClassifyError::Schema(format!(
            "confidence out of range: {}",
            c.confidence
        )));
    }
    Ok(c)
}

/// Per-article classification outcome, as seen by the orchestrator.
#[derive(Debug)]
pub enum ClassifyOutcome {
    Event { event_id: i64, cache_hit: bool },
    Discarded { cache_hit: bool },
    Failed { reason: String },
}

pub struct EventClassifier {
    provider: Arc<dyn ClassifierProvider>,
    store: Arc<Store>,
    cfg: ClassifierConfig,
}

impl EventClassifier {
    pub fn new(
        provider: Arc<dyn ClassifierProvider>,
        store: Arc<Store>,
        cfg: ClassifierConfig,
    ) -> Self {
        Self {
            provider,
            store,
            cfg,
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub fn batch_limit(&self) -> usize {
        self.cfg.batch_limit
    }

    pub fn retry_failed(&self) -> bool {
        self.cfg.retry_failed_articles
    }

    /// Gate applied before persisting; the store's floor is the lower bound
    /// even if the configured threshold drifts below it.
    fn gate(&self) -> f64 {
        self.cfg.confidence_threshold.max(EVENT_CONFIDENCE_FLOOR)
    }

    /// Classify one article: cache lookup, external call on miss, schema
    /// validation, confidence gate, persistence. Store failures propagate
    /// (fatal to the run); everything else is folded into the outcome.
    pub async fn classify_article(
        &self,
        article: &StoredArticle,
    ) -> Result<ClassifyOutcome, crate::error::StoreError> {
        counter!("scout_classify_requests_total").increment(1);

        // 1) Cache short-circuits the endpoint entirely.
        if let Some(hit) = self.store.cache_get(&article.fingerprint)? {
            counter!("scout_classify_cache_hits_total").increment(1);
            tracing::debug!(article = article.id, "classification cache hit");
            return self.decide(article, &hit.classification, true);
        }

        // 2) Fresh call with bounded retries on transport errors.
        let req = ClassifyRequest {
            system: build_system_prompt(),
            user: build_user_prompt(article, self.cfg.max_article_chars),
        };
        let raw = match self.call_with_retries(&req).await {
            Ok(raw) => raw,
            Err(e) => {
                counter!("scout_classify_failures_total").increment(1);
                let reason = e.to_string();
                self.store
                    .mark_article_classification_failed(article.id, &reason)?;
                return Ok(ClassifyOutcome::Failed { reason });
            }
        };

        // 3) Schema validation. Failures are retryable on a later run and
        //    must not poison the cache.
        let classification = match validate_payload(&raw) {
            Ok(c) => c,
            Err(e) => {
                counter!("scout_classify_failures_total").increment(1);
                tracing::warn!(article = article.id, error = %e, "rejected classifier payload");
                let reason = e.to_string();
                self.store
                    .mark_article_classification_failed(article.id, &reason)?;
                return Ok(ClassifyOutcome::Failed { reason });
            }
        };

        // 4) Only a validated payload enters the cache.
        self.store
            .cache_put(&article.fingerprint, &classification)?;

        self.decide(article, &classification, false)
    }

    fn decide(
        &self,
        article: &StoredArticle,
        c: &Classification,
        cache_hit: bool,
    ) -> Result<ClassifyOutcome, crate::error::StoreError> {
        if c.category == EventCategory::Other || c.confidence < self.gate() {
            tracing::debug!(
                article = article.id,
                category = c.category.as_str(),
                confidence = c.confidence,
                "discarding classification below gate"
            );
            self.store.mark_article_classified(article.id)?;
            return Ok(ClassifyOutcome::Discarded { cache_hit });
        }

        let event_id = self.store.insert_event(&NewEvent {
            article_id: article.id,
            category: c.category,
            confidence: c.confidence,
            impact: c.impact,
            entities: &c.entities,
            summary: &c.summary,
        })?;
        counter!("scout_events_created_total").increment(1);
        tracing::info!(
            article = article.id,
            event = event_id,
            category = c.category.as_str(),
            confidence = c.confidence,
            "event created"
        );
        Ok(ClassifyOutcome::Event {
            event_id,
            cache_hit,
        })
    }

    async fn call_with_retries(&self, req: &ClassifyRequest) -> Result<String, ClassifyError> {
        let mut delay = Duration::from_millis(500);
        let mut attempt = 0u32;
        loop {
            match self.provider.complete(req).await {
                Ok(raw) => return Ok(raw),
                Err(ClassifyError::Transport(e)) if attempt < self.cfg.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        provider = self.provider.name(),
                        error = %e,
                        attempt,
                        "classifier transport error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn build_system_prompt() -> String {
    "You are a competitive intelligence assistant. Analyze company blog posts \
and announcements to extract actionable competitive intelligence events.

## Event Categories

**feature_launch**: New product features, capabilities, tools, or major functionality additions.
**pricing_change**: Pricing updates, new tiers, packaging changes, or promotional offers.
**partnership**: Collaborations, integrations, acquisitions, or strategic alliances.
**other**: General announcements, blog posts, events, hiring, or non-strategic updates.

## Classification Rules

1. Be selective: only classify articles with actual competitive intelligence. \
Skip generic content, tutorials, or thought leadership pieces.
2. Confidence scoring, 0.0-1.0: 0.9-1.0 explicit announcement with clear details; \
0.7-0.9 strong indicators with some ambiguity; 0.5-0.7 indirect mentions; \
below 0.5 uncertain or not relevant (use category \"other\").
3. Extract entities: mentioned products, features, pricing tiers, partner companies.
4. Impact: \"high\" for major launches, significant pricing changes, acquisitions; \
\"medium\" for incremental features and standard integrations; \"low\" for minor updates.
5. Summarize in 1-2 sentences.

## Response Format

Respond with valid JSON matching exactly:
{\"category\": \"feature_launch|pricing_change|partnership|other\", \
\"confidence\": 0.85, \"impact\": \"high|medium|low\", \
\"entities\": [\"Entity1\", \"Entity2\"], \"summary\": \"Brief description.\"}

\"confidence\" MUST be a number between 0.0 and 1.0, \"entities\" MUST be an \
array of strings. If the article contains no relevant competitive intelligence, \
return category \"other\" with low confidence."
        .to_string()
}

fn build_user_prompt(article: &StoredArticle, max_chars: usize) -> String {
    let body: String = article.body.chars().take(max_chars).collect();
    format!(
        "Analyze this article for competitive intelligence:\n\n\
**Title**: {}\n\n**Source**: {}\n\n**Content**:\n{}\n\n**URL**: {}\n\n\
Classify this article according to the system instructions.\n",
        article.title, article.competitor, body, article.url
    )
}
