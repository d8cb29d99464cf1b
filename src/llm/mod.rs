// LLM plumbing: provider abstraction, HTTP client, response hygiene
// Vendor-neutral behind the LlmProvider trait; Gemini is the default

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::LlmConfig;

pub mod decision;
pub mod semantic;

pub use decision::{
    DecisionContext, DecisionOracle, HeuristicOracle, LayeredOracle, LlmDecisionOracle,
    ScrollStatus,
};
pub use semantic::SemanticVisibility;

/// LLM-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("call exceeded the {0:?} budget")]
    Timeout(Duration),
}

impl LlmError {
    /// HTTP status carried by the failure, when there is one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            LlmError::Api { status, .. } => Some(*status),
            LlmError::RateLimit(_) => Some(429),
            LlmError::Auth(_) => Some(401),
            _ => None,
        }
    }
}

/// Per-call generation knobs.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One text-in, text-out completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String, LlmError>;
    fn name(&self) -> &str;
}

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: String,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Config("Gemini API key required".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String, LlmError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: opts.temperature,
                max_output_tokens: opts.max_tokens,
            },
        };

        debug!("sending request to Gemini ({})", self.model);
        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, self.model, self.api_key
            ))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Gemini API error {}: {}", status, message);
            return match status.as_u16() {
                429 => Err(LlmError::RateLimit(message)),
                401 | 403 => Err(LlmError::Auth(message)),
                code => Err(LlmError::Api {
                    status: code,
                    message,
                }),
            };
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {}", e)))?;
        parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in response".to_string()))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Scripted provider for tests: pops one canned response per call.
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<String, u16>>>,
}

impl MockProvider {
    pub fn with_responses(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
        }
    }

    /// Provider whose every call fails with the given HTTP status.
    pub fn failing(status: u16) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(status)])),
        }
    }

    pub fn push(&self, response: &str) {
        self.responses.lock().unwrap().push_back(Ok(response.to_string()));
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, _prompt: &str, _opts: &GenerationOptions) -> Result<String, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(status)) => {
                // keep failing on subsequent calls
                responses.push_back(Err(status));
                Err(LlmError::Api {
                    status,
                    message: "mock failure".to_string(),
                })
            }
            None => Err(LlmError::InvalidResponse("mock exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Thin wrapper enforcing a per-call timeout over a provider.
pub struct LlmClient {
    provider: Box<dyn LlmProvider>,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(provider: Box<dyn LlmProvider>, max_tokens: u32) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }

    /// Build a client from configuration; `None` when no key is set, which
    /// sends callers down their heuristic paths.
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        if config.api_key.is_none() {
            return None;
        }
        match GeminiProvider::new(config) {
            Ok(provider) => Some(Self::new(Box::new(provider), config.max_tokens)),
            Err(e) => {
                error!("LLM client unavailable: {}", e);
                None
            }
        }
    }

    pub async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let opts = GenerationOptions {
            temperature,
            max_tokens: self.max_tokens,
        };
        match tokio::time::timeout(timeout, self.provider.generate(prompt, &opts)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(timeout)),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

/// Pull the JSON object out of an untrusted completion: strip markdown
/// fences, then take everything between the first `{` and the last `}`.
pub fn extract_json(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = text.trim_start_matches("```json").trim_start_matches("```");
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
        text = text.trim();
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fences() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(fenced).unwrap(), "{\"a\": 1}");

        let bare_fence = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(bare_fence).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_handles_prose_padding() {
        let padded = "Sure! Here is the plan:\n{\"steps\": []}\nLet me know.";
        assert_eq!(extract_json(padded).unwrap(), "{\"steps\": []}");
    }

    #[test]
    fn extract_json_rejects_braceless_text() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("} inverted {").is_none());
    }

    #[tokio::test]
    async fn mock_provider_pops_in_order() {
        let provider = MockProvider::with_responses(vec!["one", "two"]);
        let opts = GenerationOptions {
            temperature: 0.0,
            max_tokens: 10,
        };
        assert_eq!(provider.generate("p", &opts).await.unwrap(), "one");
        assert_eq!(provider.generate("p", &opts).await.unwrap(), "two");
        assert!(provider.generate("p", &opts).await.is_err());
    }

    #[tokio::test]
    async fn failing_provider_reports_status() {
        let provider = MockProvider::failing(503);
        let opts = GenerationOptions {
            temperature: 0.0,
            max_tokens: 10,
        };
        let err = provider.generate("p", &opts).await.unwrap_err();
        assert_eq!(err.http_status(), Some(503));
    }
}
