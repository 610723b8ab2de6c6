//! Shared application state for Axum routers.

use std::sync::Arc;

use cadence_core::CadenceResult;
use cadence_guard::{Coalescer, Governor, SocialApi};
use cadence_llm::{DraftOptions, DraftProvider, TokenBudget};

use crate::config::ApiConfig;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Call governance for every outbound social API call.
    pub governor: Arc<Governor>,
    pub social: Arc<dyn SocialApi>,
    /// `None` when no model credential is configured.
    pub drafts: Option<Arc<dyn DraftProvider>>,
    /// Identical draft requests in flight share one completion.
    pub draft_flights: Arc<Coalescer<CadenceResult<DraftOptions>>>,
    pub token_budget: TokenBudget,
    pub config: Arc<ApiConfig>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        governor: Arc<Governor>,
        social: Arc<dyn SocialApi>,
        drafts: Option<Arc<dyn DraftProvider>>,
        config: ApiConfig,
    ) -> Self {
        Self {
            governor,
            social,
            drafts,
            draft_flights: Arc::new(Coalescer::new("drafts")),
            token_budget: TokenBudget::new(config.token_budget_daily),
            config: Arc::new(config),
            start_time: std::time::Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<Governor>, governor);
