//! Cadence API - HTTP Layer
//!
//! Axum routes for governed social reads, reply posting and AI-drafted
//! replies. Every outbound social call passes through the
//! [`cadence_guard::Governor`]; this crate adds credentials, input
//! validation, error mapping, inbound rate limiting and telemetry.

pub mod config;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod routes;
pub mod social;
pub mod state;
pub mod telemetry;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::Credential;
pub use routes::create_api_router;
pub use social::XSocialClient;
pub use state::AppState;
