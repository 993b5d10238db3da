//! Language-model collaborator: structured JSON generation via Gemini.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::GeminiConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("language model is not configured")]
    NotConfigured,

    #[error("language model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("language model error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("language model returned no content")]
    EmptyResponse,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a JSON document for `prompt` constrained by `schema`.
    /// Returns the raw text; callers parse it.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError>;
}

pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        if config.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY is not set; feedback generation will be degraded");
        }
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request_body(prompt: &str, schema: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        })
    }
}

/// Concatenated text parts of the first candidate.
fn first_candidate_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    (!text.trim().is_empty()).then_some(text)
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::NotConfigured)?;

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.config.api_base, self.config.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&Self::request_body(prompt, schema))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {e}>"));
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        first_candidate_text(parsed).ok_or(LlmError::EmptyResponse)
    }
}
