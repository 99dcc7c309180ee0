use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::ProviderError;
use crate::models::AnalysisRequest;
use crate::services::ai_service::VisionProvider;
use crate::services::encoder::MimePolicy;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Newest first. Safety settings are only sent to the first one.
pub const API_SURFACES: [&str; 2] = ["v1beta", "v1"];

pub const DEFAULT_MODELS: [&str; 4] = [
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-pro-vision",
];

/// Used when none of the configured models is listed.
const MODEL_KEYWORDS: [&str; 3] = ["flash", "pro", "vision"];

const BLOCKING_FINISH_REASONS: [&str; 3] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST"];

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub api_version: String,
    pub model: String,
}

/// Single-slot cache for the resolved model, owned by one client.
#[derive(Debug, Default)]
pub struct ModelCache {
    slot: Mutex<Option<ResolvedModel>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ResolvedModel> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, model: ResolvedModel) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(model);
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    safety_settings: Option<Vec<SafetySetting>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_k: u32,
    top_p: f64,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_k: 32,
            top_p: 1.0,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
}

/// Secondary provider: Google Gemini, called directly.
pub struct GeminiClient {
    api_key: Option<String>,
    api_base: String,
    preferred_models: Vec<String>,
    client: reqwest::Client,
    cache: Arc<ModelCache>,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, preferred_models: Vec<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_base: DEFAULT_API_BASE.to_string(),
            preferred_models,
            client: reqwest::Client::new(),
            cache: Arc::new(ModelCache::new()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn model_cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    async fn list_models(&self, api_key: &str, api_version: &str) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/{}/models", self.api_base, api_version);
        let response = self.client.get(&url).query(&[("key", api_key)]).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::HttpError {
                status: status.as_u16(),
                message: google_error_message(&body),
            });
        }

        let list: ModelList = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedEnvelope(e.to_string()))?;

        Ok(list
            .models
            .into_iter()
            .filter(|m| m.supported_generation_methods.iter().any(|g| g == "generateContent"))
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }

    async fn resolve_model(&self, api_key: &str) -> Result<ResolvedModel, ProviderError> {
        if let Some(cached) = self.cache.get() {
            log::debug!("♻️ Using cached Gemini model: {}/{}", cached.api_version, cached.model);
            return Ok(cached);
        }

        for api_version in API_SURFACES {
            match self.list_models(api_key, api_version).await {
                Ok(available) => match choose_model(&available, &self.preferred_models) {
                    Some(model) => {
                        log::info!("✅ Resolved Gemini model {} on {}", model, api_version);
                        let resolved = ResolvedModel {
                            api_version: api_version.to_string(),
                            model,
                        };
                        self.cache.set(resolved.clone());
                        return Ok(resolved);
                    }
                    None => log::warn!("⚠️ No usable vision model listed on Gemini {}", api_version),
                },
                Err(e) => log::warn!("⚠️ Gemini {} model listing failed: {}", api_version, e),
            }
        }

        let model = self.preferred_models.first().ok_or_else(|| {
            ProviderError::NoModelAvailable("model listing failed and no models are configured".to_string())
        })?;

        log::warn!("⚠️ Falling back to configured Gemini model: {}", model);
        let resolved = ResolvedModel {
            api_version: API_SURFACES[0].to_string(),
            model: model.clone(),
        };
        self.cache.set(resolved.clone());
        Ok(resolved)
    }

    async fn generate(
        &self,
        api_key: &str,
        resolved: &ResolvedModel,
        request: &AnalysisRequest,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/{}/models/{}:generateContent",
            self.api_base, resolved.api_version, resolved.model
        );
        let body = build_request(request, &resolved.api_version);

        log::info!("🤖 Sending image to Gemini with model: {}", resolved.model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        log::debug!("📥 Gemini response status: {}", status);

        if !status.is_success() {
            return Err(ProviderError::HttpError {
                status: status.as_u16(),
                message: google_error_message(&text),
            });
        }

        extract_text(&text)
    }
}

#[async_trait::async_trait]
impl VisionProvider for GeminiClient {
    fn name(&self) -> &str {
        "Gemini"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn mime_policy(&self) -> MimePolicy {
        MimePolicy::Strict
    }

    async fn complete(&self, request: &AnalysisRequest) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NoModelAvailable("GEMINI_API_KEY is not set".to_string()))?;

        let resolved = self.resolve_model(api_key).await?;

        match self.generate(api_key, &resolved, request).await {
            Ok(text) => Ok(text),
            Err(e) => {
                log::warn!("⚠️ Gemini call failed, clearing cached model {}: {}", resolved.model, e);
                self.cache.clear();
                Err(e)
            }
        }
    }

    fn on_abandoned(&self) {
        if let Some(resolved) = self.cache.get() {
            log::warn!("⚠️ Gemini call abandoned, clearing cached model {}", resolved.model);
        }
        self.cache.clear();
    }
}

/// First configured model that is listed, else the first listed model matching a keyword.
fn choose_model(available: &[String], preferred: &[String]) -> Option<String> {
    preferred
        .iter()
        .find(|p| available.contains(p))
        .cloned()
        .or_else(|| {
            MODEL_KEYWORDS
                .iter()
                .find_map(|kw| available.iter().find(|m| m.contains(kw)).cloned())
        })
}

fn build_request<'a>(request: &'a AnalysisRequest, api_version: &str) -> GenerateRequest<'a> {
    let safety_settings = (api_version == API_SURFACES[0]).then(|| {
        SAFETY_CATEGORIES
            .iter()
            .map(|&category| SafetySetting {
                category,
                threshold: "BLOCK_ONLY_HIGH",
            })
            .collect::<Vec<_>>()
    });

    GenerateRequest {
        contents: vec![Content {
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: &request.mime_type,
                        data: &request.base64_image,
                    },
                },
                Part::Text {
                    text: &request.prompt,
                },
            ],
        }],
        generation_config: GenerationConfig::default(),
        safety_settings,
    }
}

fn extract_text(body: &str) -> Result<String, ProviderError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedEnvelope(e.to_string()))?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::ContentBlocked(reason));
    }

    let candidate = response.candidates.into_iter().next().ok_or(ProviderError::NoCandidates)?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if BLOCKING_FINISH_REASONS.contains(&reason) {
            return Err(ProviderError::ContentBlocked(reason.to_string()));
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::MalformedEnvelope("candidate has no text".to_string()));
    }
    Ok(text)
}

fn google_error_message(body: &str) -> String {
    serde_json::from_str::<GoogleErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}


#[cfg(all(test, feature = "proxy-server"))]
mod http_tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use axum::{http::StatusCode, routing::{get, post}, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            base64_image: "/9j/4A==".to_string(),
            mime_type: "image/jpeg".to_string(),
            prompt: "describe".to_string(),
        }
    }

    fn model_list() -> Json<Value> {
        Json(json!({
            "models": [
                {"name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"]},
                {"name": "models/gemini-pro-vision", "supportedGenerationMethods": ["generateContent"]},
                {"name": "models/gemini-1.5-flash", "supportedGenerationMethods": ["generateContent", "countTokens"]}
            ]
        }))
    }

    fn reply() -> Json<Value> {
        Json(json!({"candidates": [{"content": {"parts": [{"text": "{}"}]}, "finishReason": "STOP"}]}))
    }

    fn client(base: &str) -> GeminiClient {
        GeminiClient::new(Some("test-key".to_string()), names())
            .with_api_base(base)
    }

    fn names() -> Vec<String> {
        vec!["gemini-1.5-flash".to_string(), "gemini-pro-vision".to_string()]
    }

    #[tokio::test]
    async fn test_resolves_once_and_caches() {
        let listings = Arc::new(AtomicUsize::new(0));
        let counter = listings.clone();

        let app = Router::new()
            .route(
                "/v1beta/models",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        model_list()
                    }
                }),
            )
            .route(
                "/v1beta/models/:call",
                post(|axum::extract::Path(call): axum::extract::Path<String>, Json(body): Json<Value>| async move {
                    assert_eq!(call, "gemini-1.5-flash:generateContent");
                    assert_eq!(body["safetySettings"].as_array().map(|s| s.len()), Some(4));
                    reply()
                }),
            );
        let base = spawn_stub(app).await;

        let gemini = client(&base);
        assert_eq!(gemini.complete(&request()).await.unwrap(), "{}");
        assert_eq!(gemini.complete(&request()).await.unwrap(), "{}");

        assert_eq!(listings.load(Ordering::SeqCst), 1);
        assert_eq!(
            gemini.model_cache().get(),
            Some(ResolvedModel {
                api_version: "v1beta".to_string(),
                model: "gemini-1.5-flash".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_older_surface() {
        let app = Router::new()
            .route("/v1beta/models", get(|| async { StatusCode::NOT_FOUND }))
            .route("/v1/models", get(|| async { model_list() }))
            .route(
                "/v1/models/:call",
                post(|Json(body): Json<Value>| async move {
                    assert!(body.get("safetySettings").is_none());
                    reply()
                }),
            );
        let base = spawn_stub(app).await;

        let gemini = client(&base);
        assert_eq!(gemini.complete(&request()).await.unwrap(), "{}");
        assert_eq!(gemini.model_cache().get().unwrap().api_version, "v1");
    }

    #[tokio::test]
    async fn test_failure_clears_cache() {
        let listings = Arc::new(AtomicUsize::new(0));
        let counter = listings.clone();

        let app = Router::new()
            .route(
                "/v1beta/models",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        model_list()
                    }
                }),
            )
            .route(
                "/v1beta/models/:call",
                post(|| async {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(json!({"error": {"code": 429, "message": "Resource has been exhausted"}})),
                    )
                }),
            );
        let base = spawn_stub(app).await;

        let gemini = client(&base);
        for _ in 0..2 {
            let err = gemini.complete(&request()).await.unwrap_err();
            assert!(matches!(
                err,
                ProviderError::HttpError { status: 429, ref message } if message == "Resource has been exhausted"
            ));
            assert_eq!(gemini.model_cache().get(), None);
        }
        assert_eq!(listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timed_out_call_clears_cache() {
        let app = Router::new().route(
            "/v1beta/models/:call",
            post(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                reply()
            }),
        );
        let base = spawn_stub(app).await;

        let cache = Arc::new(ModelCache::new());
        cache.set(ResolvedModel {
            api_version: "v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
        });

        let gemini: Arc<dyn VisionProvider> = Arc::new(client(&base).with_model_cache(cache.clone()));
        let analyzer = crate::services::VisionAnalyzer::new(vec![gemini])
            .with_call_timeout(std::time::Duration::from_millis(200));

        let image = crate::models::ImagePayload::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg");
        let err = analyzer.analyze(&image).await.unwrap_err();

        assert!(matches!(
            err.failures()[0].error,
            crate::error::AttemptError::Provider(ProviderError::Timeout(_))
        ));
        assert_eq!(cache.get(), None);
    }

    #[tokio::test]
    async fn test_injected_cache_skips_listing() {
        let app = Router::new().route(
            "/v1/models/:call",
            post(|axum::extract::Path(call): axum::extract::Path<String>| async move {
                assert_eq!(call, "gemini-pro-vision:generateContent");
                reply()
            }),
        );
        let base = spawn_stub(app).await;

        let cache = Arc::new(ModelCache::new());
        cache.set(ResolvedModel {
            api_version: "v1".to_string(),
            model: "gemini-pro-vision".to_string(),
        });

        let gemini = client(&base).with_model_cache(cache.clone());
        assert_eq!(gemini.complete(&request()).await.unwrap(), "{}");
        assert!(cache.get().is_some());
    }

    #[tokio::test]
    async fn test_listing_failure_uses_first_configured_model() {
        let app = Router::new().route(
            "/v1beta/models/:call",
            post(|axum::extract::Path(call): axum::extract::Path<String>| async move {
                assert_eq!(call, "gemini-1.5-flash:generateContent");
                reply()
            }),
        );
        let base = spawn_stub(app).await;

        let gemini = client(&base);
        assert_eq!(gemini.complete(&request()).await.unwrap(), "{}");
    }
}
