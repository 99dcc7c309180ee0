use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::AppConfig;
use crate::services::encoder::strip_data_uri;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Body accepted by `POST /api/claude`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ProxyRequest {
    pub image: Option<String>,
    pub prompt: Option<String>,
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<MessageContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum MessageContent<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Error)]
pub enum ProxyRejection {
    #[error("{0}")]
    BadRequest(String),

    #[error("ANTHROPIC_API_KEY is not configured")]
    NotConfigured,

    #[error("failed to reach Claude API: {0}")]
    Upstream(String),
}

/// Forwards proxy requests to the Anthropic Messages API.
pub struct AnthropicForwarder {
    api_key: Option<String>,
    api_url: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicForwarder {
    pub fn new(api_key: Option<String>, api_url: String, model: String, max_tokens: u32) -> Self {
        Self {
            api_key,
            api_url,
            model,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.anthropic_api_key.clone(),
            config.anthropic_api_url.clone(),
            config.claude_model.clone(),
            config.claude_max_tokens,
        )
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Returns the upstream status and envelope untouched.
    pub async fn forward(&self, request: &ProxyRequest) -> Result<(u16, Value), ProxyRejection> {
        let image = request
            .image
            .as_deref()
            .map(strip_data_uri)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ProxyRejection::BadRequest("No image provided".to_string()))?;
        let prompt = request
            .prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ProxyRejection::BadRequest("No prompt provided".to_string()))?;
        let api_key = self.api_key.as_deref().ok_or(ProxyRejection::NotConfigured)?;

        let media_type = request.mime_type.as_deref().unwrap_or("image/jpeg");
        let body = self.messages_request(image, media_type, prompt);

        log::info!("🤖 Forwarding image to Claude with model: {}", self.model);
        log::debug!("📤 Image payload: {} base64 chars ({})", image.len(), media_type);

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyRejection::Upstream(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProxyRejection::Upstream(e.to_string()))?;

        log::debug!("📥 Claude API response status: {}", status);

        let envelope = serde_json::from_str(&text).map_err(|_| {
            let preview: String = text.chars().take(200).collect();
            log::error!("❌ Claude API returned non-JSON body ({}): {}", status, preview);
            ProxyRejection::Upstream(format!("invalid response from Claude API (HTTP {})", status))
        })?;

        Ok((status, envelope))
    }

    fn messages_request<'a>(&'a self, image: &'a str, media_type: &'a str, prompt: &'a str) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: vec![
                    MessageContent::Image {
                        source: ImageSource {
                            source_type: "base64",
                            media_type,
                            data: image,
                        },
                    },
                    MessageContent::Text { text: prompt },
                ],
            }],
        }
    }
}

pub fn error_body(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}

pub mod server {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{DefaultBodyLimit, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use chrono::Utc;
    use std::sync::Arc;
    use tower::ServiceBuilder;
    use tower_http::cors::CorsLayer;

    use crate::error::{AnalysisError, EncodingError};
    use crate::models::{AnalysisReport, ImagePayload};
    use crate::services::VisionAnalyzer;

    /// Room for a 20 MiB image after base64 plus the prompt.
    pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

    pub struct AppState {
        pub forwarder: Arc<AnthropicForwarder>,
        pub analyzer: Arc<VisionAnalyzer>,
    }

    pub fn create_router(forwarder: Arc<AnthropicForwarder>, analyzer: Arc<VisionAnalyzer>) -> Router {
        let state = Arc::new(AppState { forwarder, analyzer });

        Router::new()
            .route("/", get(root_handler))
            .route("/api/claude", post(claude_proxy_handler))
            .route("/api/analyze", post(analyze_handler))
            .route("/health", get(health_check))
            .layer(
                ServiceBuilder::new()
                    .layer(CorsLayer::permissive())
                    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
            )
            .with_state(state)
    }

    impl IntoResponse for ProxyRejection {
        fn into_response(self) -> Response {
            let status = match self {
                ProxyRejection::BadRequest(_) => StatusCode::BAD_REQUEST,
                ProxyRejection::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
                ProxyRejection::Upstream(_) => StatusCode::BAD_GATEWAY,
            };
            (status, Json(error_body(self))).into_response()
        }
    }

    async fn claude_proxy_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
        let request: ProxyRequest = match serde_json::from_str(&body) {
            Ok(r) => r,
            Err(e) => {
                log::error!("❌ Failed to parse proxy request: {}", e);
                return ProxyRejection::BadRequest(format!("Invalid JSON body: {}", e)).into_response();
            }
        };

        match state.forwarder.forward(&request).await {
            Ok((status, envelope)) => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                if !status.is_success() {
                    log::error!("❌ Claude API error ({}): {}", status, envelope);
                }
                (status, Json(envelope)).into_response()
            }
            Err(rejection) => {
                log::error!("❌ Proxy request rejected: {}", rejection);
                rejection.into_response()
            }
        }
    }

    pub(crate) fn status_for(error: &AnalysisError) -> StatusCode {
        match error {
            AnalysisError::Encoding(EncodingError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            AnalysisError::Encoding(EncodingError::InvalidType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AnalysisError::Encoding(EncodingError::Empty) => StatusCode::BAD_REQUEST,
            AnalysisError::Encoding(EncodingError::ReadError(_)) => StatusCode::BAD_REQUEST,
            AnalysisError::NoProviders => StatusCode::SERVICE_UNAVAILABLE,
            AnalysisError::AllProvidersFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }

    async fn analyze_handler(
        headers: HeaderMap,
        State(state): State<Arc<AppState>>,
        body: Bytes,
    ) -> Response {
        let mime_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());

        log::info!("📸 Analyze request: {} bytes ({})", body.len(), mime_type);

        let image = ImagePayload::new(body.to_vec(), mime_type);
        match state.analyzer.analyze(&image).await {
            Ok(outcome) => {
                let report = AnalysisReport {
                    summary: outcome.result.to_display_text(),
                    result: outcome.result,
                    provider: outcome.provider,
                    failures: outcome.failures.iter().map(|f| f.to_string()).collect(),
                    analyzed_at: Utc::now(),
                };
                (StatusCode::OK, Json(report)).into_response()
            }
            Err(e) => {
                log::error!("❌ Analysis failed: {}", e);
                (status_for(&e), Json(error_body(&e))).into_response()
            }
        }
    }

    async fn root_handler() -> &'static str {
        "PEPTIX vision analysis server - POST images to /api/analyze"
    }

    async fn health_check() -> &'static str {
        "OK"
    }
}
