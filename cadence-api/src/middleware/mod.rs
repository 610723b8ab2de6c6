//! Middleware modules for Cadence API
//!
//! - `auth`: bearer credential extraction
//! - `rate_limit`: inbound per-credential rate limiting
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/api/social/resolve", get(handler))
//!     // Rate limiting runs inside observability so rejections are counted
//!     .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
//!     .layer(middleware::from_fn(observability_middleware))
//!     // Outermost
//!     .layer(cors)
//! ```

mod auth;
mod rate_limit;

pub use auth::{bearer_token, Credential};
pub use rate_limit::{rate_limit_middleware, RateLimitError, RateLimitKey, RateLimitState};
