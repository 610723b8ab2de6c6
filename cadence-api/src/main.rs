//! Cadence API Server Entry Point
//!
//! Bootstraps configuration and the governor, then starts the Axum HTTP
//! server. Ctrl-C drains the server and closes both schedulers.

use std::sync::Arc;

use cadence_api::telemetry::{init_tracing, TelemetryConfig};
use cadence_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState, XSocialClient};
use cadence_core::GovernanceConfig;
use cadence_guard::{Governor, SocialApi};
use cadence_llm::{DraftProvider, XaiClient, XaiDraftProvider};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let api_config = ApiConfig::from_env();
    let governance = GovernanceConfig::from_env();
    let governor = Arc::new(Governor::from_config(&governance).with_call_log(api_config.log_calls));
    tracing::info!(ledger = ?governor.ledger_backend(), "Governor ready");

    let social: Arc<dyn SocialApi> = Arc::new(XSocialClient::new(
        api_config.social_api_base_url.clone(),
        api_config.social_api_timeout,
    )?);

    let drafts: Option<Arc<dyn DraftProvider>> = match &api_config.xai_api_key {
        Some(key) => {
            let client = XaiClient::new(
                key.clone(),
                api_config.xai_base_url.clone(),
                api_config.xai_timeout,
            )?;
            Some(Arc::new(XaiDraftProvider::new(
                client,
                api_config.xai_model.clone(),
            )))
        }
        None => {
            tracing::warn!("XAI_API_KEY not set, draft generation disabled");
            None
        }
    };

    let addr = api_config.bind_addr()?;
    let state = AppState::new(Arc::clone(&governor), social, drafts, api_config);
    let app = create_api_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "Starting Cadence API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    governor.shutdown();
    tracing::info!("Schedulers closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
