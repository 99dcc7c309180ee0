use crate::error::ProviderError;
use crate::models::AnalysisRequest;
use crate::services::encoder::MimePolicy;

/// A vision-capable model API (Claude, Gemini, ...).
///
/// `complete` performs exactly one request/response cycle and returns the
/// model's raw text answer, still unparsed.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Providers missing their prerequisites are skipped by the fallback chain.
    fn is_configured(&self) -> bool {
        true
    }

    fn mime_policy(&self) -> MimePolicy {
        MimePolicy::Any
    }

    async fn complete(&self, request: &AnalysisRequest) -> Result<String, ProviderError>;

    /// Called when an in-flight `complete` was dropped before it finished
    /// (per-call timeout). Providers holding per-call state reset it here.
    fn on_abandoned(&self) {}
}
