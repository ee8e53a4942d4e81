use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::reward_calculator::RewardSuggester;
use crate::errors::{AppError, Result};

pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

/// Reward suggestions from Google's Gemini `generateContent` API.
pub struct GeminiSuggester {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiSuggester {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RewardSuggester for GeminiSuggester {
    async fn suggest(&self, prompt: &str) -> Result<String> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens: 10,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "Gemini API returned status: {}",
                response.status()
            )));
        }

        let data: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.without_url().to_string()))?;

        let text = data.first_text().unwrap_or_default();
        debug!("Gemini replied with '{}'", text);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_gemini_field_names() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: "hello" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens: 10,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 10);
    }

    #[test]
    fn extracts_first_candidate_text() {
        let data: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": "12.50" }, { "text": "ignored" }] } },
                { "content": { "parts": [{ "text": "99" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(data.first_text().as_deref(), Some("12.50"));

        let empty: GenerateContentResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty.first_text(), None);
    }
}
