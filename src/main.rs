use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;

use peptix_vision::config::AppConfig;
use peptix_vision::services::{ClaudeProxyClient, GeminiClient, VisionAnalyzer, VisionProvider};

#[cfg(feature = "proxy-server")]
use peptix_vision::proxy::{server::create_router, AnthropicForwarder};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    log::info!("🚀 Starting PEPTIX vision analysis server...");

    let config = AppConfig::from_env();

    // One shared client per provider so per-call timeouts apply to every request
    let http = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let claude = ClaudeProxyClient::with_timeout(config.proxy_url.clone(), config.provider_timeout)
        .context("Failed to build Claude proxy client")?;
    log::info!("✅ Claude provider via proxy: {}", claude.endpoint());

    let gemini = GeminiClient::new(config.gemini_api_key.clone(), config.gemini_models.clone())
        .with_api_base(config.gemini_api_base.clone())
        .with_client(http.clone());
    if gemini.is_configured() {
        log::info!("✅ Gemini fallback enabled (models: {})", config.gemini_models.join(", "));
    } else {
        log::warn!("⚠️ GEMINI_API_KEY not set, Gemini fallback disabled");
    }

    let providers: Vec<Arc<dyn VisionProvider>> = vec![Arc::new(claude), Arc::new(gemini)];
    let analyzer = Arc::new(
        VisionAnalyzer::new(providers).with_call_timeout(config.provider_timeout),
    );
    log::info!("✅ Analyzer ready with providers: {}", analyzer.provider_names().join(" -> "));

    #[cfg(feature = "proxy-server")]
    {
        if config.anthropic_api_key.is_none() {
            log::warn!("⚠️ ANTHROPIC_API_KEY not set, /api/claude will reject requests");
        }

        let forwarder = Arc::new(AnthropicForwarder::from_config(&config).with_client(http));
        let app = create_router(forwarder, analyzer);

        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
        log::info!("🌐 Server listening on {}", config.bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                log::info!("🛑 Shutting down...");
            })
            .await
            .context("Server error")?;
    }

    #[cfg(not(feature = "proxy-server"))]
    {
        let _ = (analyzer, http);
        log::warn!("⚠️ Built without the proxy-server feature, nothing to serve");
    }

    Ok(())
}
