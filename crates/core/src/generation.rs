use crate::error::{BackendError, BackendErrorKind, QaError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const COHERE_BASE_URL: &str = "https://api.cohere.ai";
pub const DEFAULT_COHERE_MODEL: &str = "command";

/// API credential handed to the generator for a single call. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub api_key: ApiKey,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub texts: Vec<String>,
}

impl GenerationResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            texts: vec![text.into()],
        }
    }

    /// First generated text that is not blank, trimmed.
    pub fn first_text(&self) -> Option<&str> {
        self.texts
            .iter()
            .map(|text| text.trim())
            .find(|text| !text.is_empty())
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, BackendError>;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, BackendError> {
        (**self).generate(request).await
    }
}

#[derive(Debug, Serialize)]
struct CohereRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    #[serde(default)]
    generations: Vec<CohereGeneration>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CohereGeneration {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct CohereErrorBody {
    message: String,
}

/// Client for Cohere's `/v1/generate` endpoint.
pub struct CohereGenerator {
    client: Client,
    endpoint: Url,
    model: String,
    max_tokens: Option<u32>,
}

impl CohereGenerator {
    pub fn new(timeout: Duration) -> Result<Self, QaError> {
        Self::with_base_url(COHERE_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, QaError> {
        let endpoint = Url::parse(&format!("{}/v1/generate", base_url.trim_end_matches('/')))
            .map_err(|error| {
                QaError::InvalidConfiguration(format!("generation url {base_url:?}: {error}"))
            })?;
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            QaError::InvalidConfiguration(format!("generation http client: {error}"))
        })?;

        Ok(Self {
            client,
            endpoint,
            model: DEFAULT_COHERE_MODEL.to_string(),
            max_tokens: None,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl Generator for CohereGenerator {
    fn name(&self) -> &str {
        "cohere"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, BackendError> {
        debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            temperature = request.temperature,
            "requesting generation"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(request.api_key.expose())
            .json(&CohereRequest {
                model: &self.model,
                prompt: &request.prompt,
                temperature: request.temperature,
                max_tokens: self.max_tokens,
            })
            .send()
            .await
            .map_err(|error| BackendError::from_http(self.name(), error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| BackendError::from_http(self.name(), error))?;

        if !status.is_success() {
            let details = serde_json::from_str::<CohereErrorBody>(&body)
                .map(|error| error.message)
                .unwrap_or(body);
            return Err(BackendError::new(
                self.name(),
                BackendErrorKind::Status(status.as_u16()),
                details,
            ));
        }

        parse_generation_body(self.name(), &body)
    }
}

fn parse_generation_body(backend: &str, body: &str) -> Result<GenerationResponse, BackendError> {
    let parsed: CohereResponse = serde_json::from_str(body)
        .map_err(|error| BackendError::invalid_response(backend, error.to_string()))?;

    let mut texts: Vec<String> = parsed
        .generations
        .into_iter()
        .map(|generation| generation.text)
        .collect();
    texts.extend(parsed.text);

    Ok(GenerationResponse { texts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let key = ApiKey::new("  secret-value ");
        assert_eq!(key.expose(), "secret-value");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
    }

    #[test]
    fn generation_body_collects_texts() {
        let response = parse_generation_body(
            "cohere",
            r#"{"id":"x","generations":[{"id":"g","text":"  \n"},{"id":"h","text":" Paris. "}]}"#,
        )
        .unwrap();
        assert_eq!(response.first_text(), Some("Paris."));
    }

    #[test]
    fn generation_body_without_text_has_no_answer() {
        let response = parse_generation_body("cohere", r#"{"generations":[]}"#).unwrap();
        assert_eq!(response.first_text(), None);

        let error = parse_generation_body("cohere", "not json").unwrap_err();
        assert_eq!(error.kind, BackendErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn unresponsive_server_surfaces_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let generator = CohereGenerator::with_base_url(
            &format!("http://{address}"),
            Duration::from_millis(200),
        )
        .unwrap();
        let request = GenerationRequest {
            prompt: "prompt".to_string(),
            temperature: 0.1,
            api_key: ApiKey::new("key"),
        };

        let error = generator.generate(&request).await.unwrap_err();
        assert!(error.is_timeout(), "unexpected error: {error}");
        assert!(error.is_transient());
        server.abort();
    }
}
