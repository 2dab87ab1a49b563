// src/classify/provider.rs
// Provider abstraction for the external classification endpoint. Separated
// from the classifier core so the cache/gate logic is exercised identically
// in production and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;

/// One extraction request. Decoding temperature is pinned to 0 so repeat
/// calls for the same article are as deterministic as the endpoint allows.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub system: String,
    pub user: String,
}

/// Low-level provider: performs the remote call and returns the raw JSON
/// content of the reply. Transport failures are the retryable kind.
#[async_trait]
pub trait ClassifierProvider: Send + Sync {
    async fn complete(&self, req: &ClassifyRequest) -> Result<String, ClassifyError>;
    fn name(&self) -> &'static str;
}

/// OpenAI provider (Chat Completions API).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("scout-intel/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ClassifierProvider for OpenAiProvider {
    async fn complete(&self, req: &ClassifyRequest) -> Result<String, ClassifyError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &req.system,
                },
                Msg {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: 0.0,
            max_tokens: 500,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::Transport(format!(
                "endpoint returned {status}"
            )));
        }

        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassifyError::Schema("reply carried no choices".to_string()))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Test double: returns a fixed raw payload and counts invocations, so cache
/// behavior is observable from the outside.
pub struct MockProvider {
    payload: String,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifierProvider for MockProvider {
    async fn complete(&self, _req: &ClassifyRequest) -> Result<String, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
