pub mod config;
pub mod error;
pub mod models;
pub mod services;

#[cfg(feature = "proxy-server")]
pub mod proxy; // Claude proxy endpoint + analyze route

#[cfg(all(test, feature = "proxy-server"))]
mod test_support;

pub use config::AppConfig;
pub use error::{AnalysisError, EncodingError, ParsingError, ProviderError};
pub use models::{AnalysisResult, ImagePayload};
pub use services::VisionAnalyzer;
