use std::sync::Arc;
use std::time::Duration;

use crate::error::{AnalysisError, AttemptError, ProviderError, ProviderFailure};
use crate::models::{AnalysisRequest, AnalysisResult, ImagePayload};
use crate::services::ai_service::VisionProvider;
use crate::services::encoder::{self, MimePolicy};
use crate::services::normalizer;
use crate::services::prompt;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

/// Result of a successful analysis, with the failures that preceded it.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub provider: String,
    pub failures: Vec<ProviderFailure>,
}

/// Runs the fallback chain: providers are tried one at a time, in order,
/// until one returns a reply that normalizes.
///
/// Dropping the future returned by [`VisionAnalyzer::analyze`] cancels the
/// in-flight provider call.
pub struct VisionAnalyzer {
    providers: Vec<Arc<dyn VisionProvider>>,
    call_timeout: Duration,
}

impl VisionAnalyzer {
    pub fn new(providers: Vec<Arc<dyn VisionProvider>>) -> Self {
        Self {
            providers,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn analyze(&self, image: &ImagePayload) -> Result<AnalysisOutcome, AnalysisError> {
        let base64_image = encoder::encode_image(image, MimePolicy::Any)?;

        let request = AnalysisRequest {
            base64_image,
            mime_type: encoder::canonical_mime(&image.mime_type),
            prompt: prompt::analysis_prompt(),
        };

        self.analyze_request(&request).await
    }

    pub async fn analyze_request(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, AnalysisError> {
        let canonical;
        let mime_type = encoder::canonical_mime(&request.mime_type);
        let request = if mime_type == request.mime_type {
            request
        } else {
            canonical = AnalysisRequest {
                mime_type,
                ..request.clone()
            };
            &canonical
        };

        let mut failures = Vec::new();
        let mut attempted = 0;

        for provider in &self.providers {
            if !provider.is_configured() {
                log::info!("⏭️ Skipping {}: not configured", provider.name());
                continue;
            }
            attempted += 1;

            match self.attempt(provider.as_ref(), request).await {
                Ok(result) => {
                    log::info!(
                        "✅ Analysis succeeded with {} ({} peptides)",
                        provider.name(),
                        result.peptides.len()
                    );
                    return Ok(AnalysisOutcome {
                        result,
                        provider: provider.name().to_string(),
                        failures,
                    });
                }
                Err(error) => {
                    let failure = ProviderFailure {
                        provider: provider.name().to_string(),
                        error,
                    };
                    log::warn!("⚠️ {}", failure);
                    failures.push(failure);
                }
            }
        }

        if attempted == 0 {
            return Err(AnalysisError::NoProviders);
        }

        log::error!("❌ All {} providers failed", failures.len());
        Err(AnalysisError::AllProvidersFailed(failures))
    }

    async fn attempt(
        &self,
        provider: &dyn VisionProvider,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResult, AttemptError> {
        encoder::ensure_accepted(&request.mime_type, provider.mime_policy())?;

        log::info!("🔄 Trying {}", provider.name());
        let reply = tokio::time::timeout(self.call_timeout, provider.complete(request))
            .await
            .map_err(|_| {
                provider.on_abandoned();
                ProviderError::Timeout(self.call_timeout)
            })??;

        Ok(normalizer::normalize_reply(&reply)?)
    }
}
