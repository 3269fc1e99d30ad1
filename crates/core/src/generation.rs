use crate::embeddings::GEMINI_API_BASE;
use crate::error::{GenerationError, RemoteError};
use crate::retry::{send_with_retry, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<GenerateContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GenerateContent<'a> {
    role: &'static str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
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
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<String>();

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: GEMINI_API_BASE.to_string(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            contents: vec![GenerateContent {
                role: "user",
                parts: vec![TextPart { text: prompt }],
            }],
        };
        let url = format!("{}/models/{model}:generateContent", self.endpoint);

        let response = send_with_retry("gemini-generate", &self.retry, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
        })
        .await?;

        let parsed: GenerateResponse = response.json().await.map_err(RemoteError::Http)?;
        parsed
            .into_text()
            .ok_or_else(|| GenerationError::EmptyResponse(format!("gemini model {model}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{http_response, spawn_mock_server};

    #[tokio::test]
    async fn generated_parts_are_joined() -> Result<(), GenerationError> {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Seals "},{"text":"leak."}]}}]}"#;
        let (url, captured) = spawn_mock_server(vec![http_response(200, body)]).await;
        let generator = GeminiGenerator::new("secret").with_endpoint(url);

        let text = generator.generate("Why?", "gemini-test").await?;
        assert_eq!(text, "Seals leak.");

        let requests = captured.lock().map(|r| r.clone()).unwrap_or_default();
        assert!(requests[0].starts_with("POST /models/gemini-test:generateContent"));
        assert!(requests[0].contains(r#""text":"Why?""#));
        Ok(())
    }

    #[tokio::test]
    async fn empty_candidates_are_an_error() {
        let (url, _captured) =
            spawn_mock_server(vec![http_response(200, r#"{"candidates":[]}"#)]).await;
        let generator = GeminiGenerator::new("secret").with_endpoint(url);

        assert!(matches!(
            generator.generate("Why?", "gemini-test").await,
            Err(GenerationError::EmptyResponse(_))
        ));
    }

    #[tokio::test]
    async fn client_errors_propagate() {
        let (url, _captured) =
            spawn_mock_server(vec![http_response(403, r#"{"error":"denied"}"#)]).await;
        let generator = GeminiGenerator::new("secret")
            .with_endpoint(url)
            .with_retry(RetryPolicy::none());

        assert!(matches!(
            generator.generate("Why?", "gemini-test").await,
            Err(GenerationError::Remote(RemoteError::Status { status: 403, .. }))
        ));
    }
}
