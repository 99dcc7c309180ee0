use std::env;
use std::time::Duration;

use crate::services::gemini::{DEFAULT_API_BASE, DEFAULT_MODELS};

pub const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Where the pipeline reaches the Claude proxy.
    pub proxy_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_api_url: String,
    pub claude_model: String,
    pub claude_max_tokens: u32,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    /// Allow-list in priority order.
    pub gemini_models: Vec<String>,
    pub provider_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let proxy_url = get("PROXY_URL").unwrap_or_else(|| {
            let port = bind_addr.rsplit(':').next().unwrap_or("8080");
            format!("http://127.0.0.1:{}/api/claude", port)
        });

        let gemini_models = get("GEMINI_MODELS")
            .map(|m| {
                m.split(',')
                    .map(|s| s.trim().trim_start_matches("models/").to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_MODELS.iter().map(|m| m.to_string()).collect());

        let provider_timeout = get("PROVIDER_TIMEOUT_SECS")
            .and_then(|t| t.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(45));

        Self {
            bind_addr,
            proxy_url,
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_api_url: get("ANTHROPIC_API_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string()),
            claude_model: get("CLAUDE_MODEL").unwrap_or_else(|| DEFAULT_CLAUDE_MODEL.to_string()),
            claude_max_tokens: get("CLAUDE_MAX_TOKENS")
                .and_then(|t| t.parse().ok())
                .unwrap_or(4096),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_api_base: get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            gemini_models,
            provider_timeout,
        }
    }
}
