pub mod ai_service; // Provider trait
pub mod analyzer; // Fallback chain
pub mod claude; // Primary provider via /api/claude
pub mod encoder;
pub mod gemini; // Secondary provider
pub mod normalizer;
pub mod prompt;

pub use ai_service::VisionProvider;
pub use analyzer::{AnalysisOutcome, VisionAnalyzer};
pub use claude::ClaudeProxyClient;
pub use gemini::{GeminiClient, ModelCache};
