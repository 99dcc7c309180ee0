use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ProviderError;
use crate::models::AnalysisRequest;
use crate::services::ai_service::VisionProvider;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyRequest<'a> {
    image: &'a str,
    prompt: &'a str,
    mime_type: &'a str,
}

/// Anthropic message envelope, as returned verbatim by the proxy.
#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Text(String),
    Object { message: String },
}

/// Primary provider: Claude, reached through the local `/api/claude` proxy.
pub struct ClaudeProxyClient {
    endpoint: String,
    client: reqwest::Client,
}

impl ClaudeProxyClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(endpoint: String, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: ErrorDetail::Text(message) })
        | Ok(ErrorBody { error: ErrorDetail::Object { message } }) => message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn extract_text(body: &str) -> Result<String, ProviderError> {
    let envelope: MessageEnvelope = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedEnvelope(e.to_string()))?;

    envelope
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .find(|text| !text.trim().is_empty())
        .ok_or_else(|| ProviderError::MalformedEnvelope("no text content in response".to_string()))
}

#[async_trait::async_trait]
impl VisionProvider for ClaudeProxyClient {
    fn name(&self) -> &str {
        "Claude"
    }

    async fn complete(&self, request: &AnalysisRequest) -> Result<String, ProviderError> {
        let payload = ProxyRequest {
            image: &request.base64_image,
            prompt: &request.prompt,
            mime_type: &request.mime_type,
        };

        log::info!("🤖 Sending image to Claude proxy: {}", self.endpoint);

        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        log::debug!("📥 Claude proxy response status: {}", status);

        if !status.is_success() {
            let message = error_message(status, &body);
            log::error!("❌ Claude proxy error ({}): {}", status, message);
            return Err(ProviderError::HttpError {
                status: status.as_u16(),
                message,
            });
        }

        let text = extract_text(&body)?;
        log::debug!("📄 Claude reply size: {} bytes", text.len());
        Ok(text)
    }
}
