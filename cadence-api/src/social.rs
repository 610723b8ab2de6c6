//! HTTP client for the social network's v2 API.
//!
//! Every call returns the provider's headers, on success and on failure, so
//! the governance layer can observe quota state.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cadence_core::HeaderSnapshot;
use cadence_guard::{RemoteFailure, RemoteResponse, RemoteResult, SocialApi, TimelineFilter};
use reqwest::{header::HeaderMap, Client, RequestBuilder};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::telemetry::metrics;

pub struct XSocialClient {
    client: Client,
    base_url: String,
}

impl XSocialClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn execute(&self, kind: &str, request: RequestBuilder) -> RemoteResult {
        let start = Instant::now();
        let result = Self::send(request).await;
        if let Some(metrics) = metrics() {
            let status = match &result {
                Ok(response) => Some(response.status),
                Err(failure) => failure.status,
            };
            metrics.record_remote_call(kind, status, start.elapsed().as_secs_f64());
        }
        result
    }

    async fn send(request: RequestBuilder) -> RemoteResult {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteFailure::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = snapshot_headers(response.headers());
        let text = response.text().await.map_err(|e| {
            RemoteFailure::transport(format!("Failed to read response body: {}", e))
                .with_headers(headers.clone())
        })?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if (200..300).contains(&status) {
            Ok(RemoteResponse {
                status,
                body,
                headers,
            })
        } else {
            Err(RemoteFailure::new(status, error_message(status, &body)).with_headers(headers))
        }
    }
}

fn snapshot_headers(headers: &HeaderMap) -> HeaderSnapshot {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Best human-readable message from a provider error body.
fn error_message(status: u16, body: &Value) -> String {
    body.get("detail")
        .or_else(|| body.get("title"))
        .or_else(|| {
            body.get("errors")
                .and_then(|errors| errors.get(0))
                .and_then(|first| first.get("message"))
        })
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Request failed with status {}", status))
}

#[async_trait]
impl SocialApi for XSocialClient {
    async fn user_by_username(&self, token: &str, username: &str) -> RemoteResult {
        let request = self
            .client
            .get(self.url(&format!("users/by/username/{}", username)))
            .bearer_auth(token);
        self.execute("user_by_username", request).await
    }

    async fn user_timeline(
        &self,
        token: &str,
        user_id: &str,
        filter: TimelineFilter,
        max_results: u32,
    ) -> RemoteResult {
        let mut query = vec![("max_results", max_results.to_string())];
        let exclude = filter.exclude();
        if !exclude.is_empty() {
            query.push(("exclude", exclude.join(",")));
        }
        let request = self
            .client
            .get(self.url(&format!("users/{}/tweets", user_id)))
            .bearer_auth(token)
            .query(&query);
        self.execute("user_timeline", request).await
    }

    async fn search_recent(&self, token: &str, query: &str, max_results: u32) -> RemoteResult {
        let request = self
            .client
            .get(self.url("tweets/search/recent"))
            .bearer_auth(token)
            .query(&[("query", query.to_string()), ("max_results", max_results.to_string())]);
        self.execute("search_recent", request).await
    }

    async fn post_reply(&self, token: &str, in_reply_to_id: &str, text: &str) -> RemoteResult {
        let body = json!({
            "text": text,
            "reply": { "in_reply_to_tweet_id": in_reply_to_id },
        });
        let request = self
            .client
            .post(self.url("tweets"))
            .bearer_auth(token)
            .json(&body);
        self.execute("post_reply", request).await
    }
}

impl std::fmt::Debug for XSocialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XSocialClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_snapshot_headers_lowercases() {
        let mut headers = HeaderMap::new();
        headers.insert("X-User-Limit-24hour-Remaining", HeaderValue::from_static("3"));
        let snapshot = snapshot_headers(&headers);
        assert_eq!(snapshot.get("x-user-limit-24hour-remaining"), Some("3"));
    }

    #[test]
    fn test_error_message_preference() {
        assert_eq!(
            error_message(429, &json!({"title": "Too Many Requests", "detail": "slow down"})),
            "slow down"
        );
        assert_eq!(
            error_message(400, &json!({"errors": [{"message": "bad id"}]})),
            "bad id"
        );
        assert_eq!(error_message(500, &Value::Null), "Request failed with status 500");
    }

    #[test]
    fn test_url_join() -> ApiResult<()> {
        let client = XSocialClient::new("https://api.x.com/2/", Duration::from_secs(1))?;
        assert_eq!(client.url("/tweets"), "https://api.x.com/2/tweets");
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_body_is_transport_failure() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            // promises 64 bytes, sends 8, then hangs up
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      content-type: application/json\r\n\
                      content-length: 64\r\n\
                      x-rate-limit-remaining: 12\r\n\r\n\
                      {\"data\":",
                )
                .await;
        });

        let client =
            XSocialClient::new(format!("http://{}", addr), Duration::from_secs(5)).expect("client");
        let request = client.client.get(client.url("/users/by/username/jack"));
        let failure = XSocialClient::send(request)
            .await
            .expect_err("truncated body must not succeed");

        assert_eq!(failure.status, None);
        assert_eq!(failure.headers.get("x-rate-limit-remaining"), Some("12"));
    }
}
