//! REST API Routes Module
//!
//! - Social reads under /api/social/* (governed read path)
//! - Reply posting and drafting under /api/replies/*
//! - Operator status under /debug/*
//! - Health checks under /health/* (public)
//! - Prometheus metrics at /metrics

pub mod debug;
pub mod health;
pub mod replies;
pub mod social;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ApiConfig;
use crate::middleware::{rate_limit_middleware, RateLimitState};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use debug::create_router as debug_router;
pub use health::create_router as health_router;
pub use replies::create_router as replies_router;
pub use social::create_router as social_router;

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// With no configured origins every origin is allowed.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any).expose_headers(Any)
    } else {
        tracing::info!("CORS: allowing origins: {:?}", config.cors_origins);
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
            .expose_headers([
                HeaderName::from_static("x-ratelimit-limit"),
                header::RETRY_AFTER,
            ])
    }
}

/// Create the complete API router.
///
/// # Middleware Order (outer to inner)
/// 1. CORS - handles preflight requests
/// 2. Trace and observability - spans, logs and metrics
/// 3. Inbound rate limiting - rejects floods before any governance work
pub fn create_api_router(state: AppState) -> Router {
    let rate_limit_state = RateLimitState::new(&state.config);
    let cors = build_cors_layer(&state.config);

    let api_routes = Router::new()
        .nest("/social", social::create_router())
        .nest("/replies", replies::create_router());

    Router::new()
        .nest("/api", api_routes)
        .nest("/debug", debug::create_router())
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(from_fn_with_state(rate_limit_state, rate_limit_middleware))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
