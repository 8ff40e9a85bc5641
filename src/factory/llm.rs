//! Text-generation client.
//!
//! Stages talk to the model through [`TextGenerator`]; [`GeminiClient`] is the
//! production implementation over the `generateContent` REST endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GenerationSettings;
use crate::errors::GenerationError;

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    /// Key for this call; the client's fallback key is used when absent.
    pub api_key: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature,
            api_key: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_api_key(mut self, api_key: Option<&str>) -> Self {
        self.api_key = api_key.map(str::to_string);
        self
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
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

fn request_body(request: &GenerationRequest) -> GenerateContentBody<'_> {
    GenerateContentBody {
        system_instruction: request.system.as_deref().map(|text| Content {
            role: None,
            parts: vec![Part { text }],
        }),
        contents: vec![Content {
            role: Some("user"),
            parts: vec![Part {
                text: &request.prompt,
            }],
        }],
        generation_config: GenerationConfig {
            temperature: request.temperature,
        },
    }
}

/// Concatenated text of the first candidate.
fn response_text(body: &str) -> Result<String, GenerationError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Decode(e.to_string()))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text)
}

// ── Gemini client ─────────────────────────────────────────────────────

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    fallback_api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(settings: &GenerationSettings) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(GenerationError::Transport)?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            fallback_api_key: settings.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn resolve_key<'a>(&'a self, request: &'a GenerationRequest) -> Option<&'a str> {
        let usable = |k: &&str| !k.trim().is_empty();
        request
            .api_key
            .as_deref()
            .filter(usable)
            .or(self.fallback_api_key.as_deref().filter(usable))
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let key = self
            .resolve_key(request)
            .ok_or(GenerationError::MissingApiKey)?;
        debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            temperature = request.temperature,
            "Calling generation API"
        );

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(GenerationError::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(GenerationError::Transport)?;
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: crate::util::truncate(&body, 500),
            });
        }
        response_text(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let request = GenerationRequest::new("Write an app", 0.8).with_system("Be terse");
        let json = serde_json::to_value(request_body(&request)).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be terse");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Write an app");
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_request_body_without_system() {
        let json = serde_json::to_value(request_body(&GenerationRequest::new("x", 0.3))).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]}}]}"#;
        assert_eq!(response_text(body).unwrap(), "Hello world");
    }

    #[test]
    fn test_response_text_empty_and_invalid() {
        assert!(matches!(
            response_text(r#"{"candidates":[]}"#),
            Err(GenerationError::EmptyResponse)
        ));
        assert!(matches!(
            response_text(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#),
            Err(GenerationError::EmptyResponse)
        ));
        assert!(matches!(
            response_text("not json"),
            Err(GenerationError::Decode(_))
        ));
    }

    #[test]
    fn test_key_resolution_prefers_request() {
        let settings = GenerationSettings {
            api_key: Some("fallback".into()),
            ..Default::default()
        };
        let client = GeminiClient::new(&settings).unwrap();
        let with_key = GenerationRequest::new("x", 0.5).with_api_key(Some("stored"));
        assert_eq!(client.resolve_key(&with_key), Some("stored"));
        assert_eq!(
            client.resolve_key(&GenerationRequest::new("x", 0.5)),
            Some("fallback")
        );
        assert!(client.endpoint().ends_with("/v1beta/models/gemini-2.5-flash:generateContent"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let client = GeminiClient::new(&GenerationSettings::default()).unwrap();
        let err = client
            .generate(&GenerationRequest::new("x", 0.5))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey));
    }
}
