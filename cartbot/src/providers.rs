//! Concrete provider clients for the core's capability contracts.
//!
//! Two networked adapters live here: an OpenAI-backed suggestion client and
//! a generic HTTP OCR client (any endpoint that accepts raw image bytes and
//! answers with recognized lines, such as a self-hosted tesseract service).
//! Both are constructed from environment variables and both are optional;
//! the core degrades to local-only behaviour without them.

use async_trait::async_trait;
use cartbot_core::contract::{AiProvider, OcrLine, OcrProvider, PurchaseSummary};
use cartbot_core::error::ProviderError;
use serde::Deserialize;
use std::env;

/// Suggestion client against the OpenAI chat completions API.
pub struct OpenAiSuggestClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiSuggestClient {
    pub fn new_from_env() -> Result<Self, ProviderError> {
        match env::var("OPENAI_API_KEY") {
            Ok(api_key) => {
                let model =
                    env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_owned());
                tracing::info!(model = %model, "Initialized OpenAI suggestion client from environment");
                Ok(OpenAiSuggestClient {
                    client: reqwest::Client::new(),
                    api_key,
                    model,
                })
            }
            Err(e) => {
                tracing::error!(error = ?e, "OPENAI_API_KEY missing in environment");
                Err(Box::new(e))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl AiProvider for OpenAiSuggestClient {
    async fn suggest(&self, history: Vec<PurchaseSummary>) -> Result<Vec<String>, ProviderError> {
        tracing::info!(items = history.len(), "Requesting suggestion candidates");
        let history_lines: Vec<String> = history
            .iter()
            .map(|row| {
                format!(
                    "{} (bought {} times, last price {})",
                    row.canonical_name,
                    row.times_purchased,
                    row.last_price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "unknown".to_owned())
                )
            })
            .collect();
        let prompt = format!(
            "Given this grocery purchase history, suggest up to 5 items the user \
             may want to buy again. Answer with one item name per line and \
             nothing else.\n\n{}",
            history_lines.join("\n")
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "OpenAI API returned error: {text}");
            return Err(format!("OpenAI API error: {status}").into());
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        let candidates: Vec<String> = content
            .lines()
            .map(|line| line.trim_start_matches(['-', '*', ' ']).trim().to_owned())
            .filter(|line| !line.is_empty())
            .take(10)
            .collect();
        tracing::info!(count = candidates.len(), "Received suggestion candidates");
        Ok(candidates)
    }
}

/// OCR client against a plain HTTP endpoint: POST the raw image bytes,
/// receive `[{"text": ..., "confidence": ...}]` back.
pub struct HttpOcrClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcrClient {
    pub fn new_from_env() -> Result<Self, ProviderError> {
        match env::var("OCR_ENDPOINT") {
            Ok(endpoint) => {
                let api_key = env::var("OCR_API_KEY").ok();
                tracing::info!(
                    endpoint = %endpoint,
                    api_key_set = api_key.is_some(),
                    "Initialized HTTP OCR client from environment"
                );
                Ok(HttpOcrClient {
                    client: reqwest::Client::new(),
                    endpoint,
                    api_key,
                })
            }
            Err(e) => {
                tracing::error!(error = ?e, "OCR_ENDPOINT missing in environment");
                Err(Box::new(e))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OcrResponseLine {
    text: String,
    #[serde(default)]
    confidence: f32,
}

#[async_trait]
impl OcrProvider for HttpOcrClient {
    async fn extract(&self, image_bytes: Vec<u8>) -> Result<Vec<OcrLine>, ProviderError> {
        tracing::info!(bytes = image_bytes.len(), "Submitting receipt image for extraction");
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/octet-stream")
            .body(image_bytes);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "OCR endpoint returned error: {text}");
            return Err(format!("OCR endpoint error: {status}").into());
        }

        let lines: Vec<OcrResponseLine> = response.json().await?;
        tracing::info!(count = lines.len(), "Received extracted lines");
        Ok(lines
            .into_iter()
            .map(|line| OcrLine {
                text: line.text,
                confidence: line.confidence,
            })
            .collect())
    }
}
