//! Boundary types for governed remote operations.

use async_trait::async_trait;
use cadence_core::{GovernanceError, HeaderSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A successful remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Value,
    pub headers: HeaderSnapshot,
}

impl RemoteResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            headers: HeaderSnapshot::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderSnapshot) -> Self {
        self.headers = headers;
        self
    }
}

/// A failed remote call, with whatever headers the provider sent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Remote call failed with status {status:?}: {message}")]
pub struct RemoteFailure {
    /// `None` for transport failures.
    pub status: Option<u16>,
    pub message: String,
    pub headers: HeaderSnapshot,
}

impl RemoteFailure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            headers: HeaderSnapshot::new(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            headers: HeaderSnapshot::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderSnapshot) -> Self {
        self.headers = headers;
        self
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(429)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    /// Map failures other than rate limits to the governance taxonomy.
    pub fn into_upstream(self) -> GovernanceError {
        if self.is_unauthorized() {
            GovernanceError::NotAuthenticated
        } else {
            GovernanceError::Upstream {
                status: self.status,
                message: self.message,
            }
        }
    }
}

pub type RemoteResult = Result<RemoteResponse, RemoteFailure>;

// ============================================================================
// SOCIAL API
// ============================================================================

/// Timeline filter used by the latest-post cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineFilter {
    /// No retweets, no replies.
    OriginalsOnly,
    /// No retweets.
    WithReplies,
    Everything,
}

impl TimelineFilter {
    /// Filters tried in order until one yields a post.
    pub const CASCADE: [TimelineFilter; 3] = [
        TimelineFilter::OriginalsOnly,
        TimelineFilter::WithReplies,
        TimelineFilter::Everything,
    ];

    /// Values for the provider's `exclude` parameter.
    pub fn exclude(&self) -> &'static [&'static str] {
        match self {
            TimelineFilter::OriginalsOnly => &["retweets", "replies"],
            TimelineFilter::WithReplies => &["retweets"],
            TimelineFilter::Everything => &[],
        }
    }
}

/// The quota-constrained social network API, scoped by a bearer credential.
#[async_trait]
pub trait SocialApi: Send + Sync {
    async fn user_by_username(&self, token: &str, username: &str) -> RemoteResult;

    async fn user_timeline(
        &self,
        token: &str,
        user_id: &str,
        filter: TimelineFilter,
        max_results: u32,
    ) -> RemoteResult;

    async fn search_recent(&self, token: &str, query: &str, max_results: u32) -> RemoteResult;

    async fn post_reply(&self, token: &str, in_reply_to_id: &str, text: &str) -> RemoteResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert!(RemoteFailure::new(429, "slow down").is_rate_limited());
        assert_eq!(
            RemoteFailure::new(401, "expired").into_upstream(),
            GovernanceError::NotAuthenticated
        );
        assert_eq!(
            RemoteFailure::transport("connection reset").into_upstream(),
            GovernanceError::Upstream {
                status: None,
                message: "connection reset".to_string(),
            }
        );
    }

    #[test]
    fn test_cascade_order() {
        let excludes: Vec<_> = TimelineFilter::CASCADE
            .iter()
            .map(|f| f.exclude().len())
            .collect();
        assert_eq!(excludes, vec![2, 1, 0]);
    }
}
