use crate::CompletionProvider;
use async_trait::async_trait;
use chatrelay_common::{Completion, CompletionRequest, Error, Result, Usage};
use chatrelay_config::ProviderConfig;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::time::Duration;
use tracing::debug;

const PROCESSING_MS_HEADER: &str = "openai-processing-ms";

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.timeout_secs)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout_secs)
        } else {
            Error::ServiceUnavailable(format!("Completion request failed: {}", e))
        }
    }

    /// Turn a non-success response into a provider error carrying its status
    async fn failure(response: Response) -> Error {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error.message)
            .ok()
            .or_else(|| Some(text.trim().to_string()).filter(|t| !t.is_empty()))
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_default();

        Error::Provider {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<Completion> {
        debug!(model = %request.model, messages = request.messages.len(), "Sending completion request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let status = response.status().as_u16();
        let processing_ms = response
            .headers()
            .get(PROCESSING_MS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider {
                status,
                message: format!("Malformed completion response: {}", e),
            })?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Provider {
                status,
                message: "Completion response contained no reply".into(),
            })?;

        Ok(Completion {
            content,
            usage: body.usage,
            processing_ms,
        })
    }
}
