//! Polling API Client
//!
//! REST client for the `/api` surface of the polling backend: create, fetch,
//! vote on and delete polls.

use crate::polls::{NewPoll, PollCreated, PollPublic, PollResults, VoteReceipt, VoteRequest};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Header carrying the poll ownership credential
pub const CREATOR_KEY_HEADER: &str = "X-Creator-Key";

/// API error taxonomy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Rejected input, either by the server (400/422) or before sending
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unexpected response (HTTP {status}): {message}")]
    Unexpected { status: u16, message: String },
    /// The response body did not have the expected shape
    #[error("Invalid response from server: {0}")]
    Schema(String),
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Whether a failed poll fetch ends the view.
    ///
    /// Only rejected input leaves something for the user to correct; a missing
    /// or private poll, an unreachable server and a malformed response all end
    /// in the same place.
    pub fn is_terminal_for_view(&self) -> bool {
        !matches!(self, ApiError::Validation(_))
    }

    /// Map a non-success response to an error, preferring the server's `detail`
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = extract_detail(body);
        let message = |fallback: &str| detail.clone().unwrap_or_else(|| fallback.to_string());

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ApiError::Validation(message("The request was rejected."))
            }
            StatusCode::NOT_FOUND => ApiError::NotFound(message("Poll not found.")),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ApiError::Forbidden(message("Access denied."))
            }
            _ => ApiError::Unexpected {
                status: status.as_u16(),
                message: message("An unexpected error occurred."),
            },
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// Handles `{"detail": "..."}` and request-validation bodies of the form
/// `{"detail": [{"msg": "..."}, ...]}`.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}

/// Source of results snapshots
#[async_trait]
pub trait ResultsSource: Send + Sync {
    /// Fetch poll metadata plus the current tally
    async fn fetch_results(
        &self,
        poll_id: &str,
        creator_key: Option<&str>,
    ) -> Result<PollResults, ApiError>;
}

/// REST client for the polling API
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a client for the API rooted at `base_url` (e.g. `http://localhost:8000/api`).
    ///
    /// No timeout is applied unless one is given.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let parsed = url::Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn poll_url(&self, poll_id: &str, suffix: &str) -> String {
        format!(
            "{}/polls/{}{}",
            self.base_url,
            urlencoding::encode(poll_id),
            suffix
        )
    }

    /// Create a new poll
    pub async fn create_poll(&self, poll: &NewPoll) -> Result<PollCreated, ApiError> {
        poll.validate().map_err(ApiError::Validation)?;

        let request = self
            .client
            .post(format!("{}/polls", self.base_url))
            .json(poll);
        let created: PollCreated = decode(send(request).await?).await?;

        info!(poll_id = %created.poll_id, "poll created");
        Ok(created)
    }

    /// Fetch public poll metadata (no tally)
    pub async fn get_poll(&self, poll_id: &str) -> Result<PollPublic, ApiError> {
        let request = self.client.get(self.poll_url(poll_id, ""));
        decode(send(request).await?).await
    }

    /// Fetch poll metadata plus tally. Private results need the creator key.
    pub async fn get_results(
        &self,
        poll_id: &str,
        creator_key: Option<&str>,
    ) -> Result<PollResults, ApiError> {
        let mut request = self.client.get(self.poll_url(poll_id, "/results"));
        if let Some(key) = creator_key {
            request = request.header(CREATOR_KEY_HEADER, key);
        }
        decode(send(request).await?).await
    }

    /// Cast a vote. Selection is checked against `poll` before sending.
    pub async fn cast_vote(
        &self,
        poll: &PollPublic,
        vote: &VoteRequest,
    ) -> Result<VoteReceipt, ApiError> {
        vote.validate_for(poll).map_err(ApiError::Validation)?;

        let request = self
            .client
            .post(self.poll_url(&poll.poll_id, "/vote"))
            .json(vote);
        let receipt: VoteReceipt = decode(send(request).await?).await?;

        info!(poll_id = %poll.poll_id, options = vote.option_ids.len(), "vote cast");
        Ok(receipt)
    }

    /// Delete a poll. Requires the creator key.
    pub async fn delete_poll(&self, poll_id: &str, creator_key: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .delete(self.poll_url(poll_id, ""))
            .header(CREATOR_KEY_HEADER, creator_key);
        let response = send(request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        info!(poll_id = %poll_id, "poll deleted");
        Ok(())
    }
}

#[async_trait]
impl ResultsSource for ApiClient {
    async fn fetch_results(
        &self,
        poll_id: &str,
        creator_key: Option<&str>,
    ) -> Result<PollResults, ApiError> {
        self.get_results(poll_id, creator_key).await
    }
}

async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    request
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))
}

/// Check status and decode the body as `T`
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

    if !status.is_success() {
        debug!(status = status.as_u16(), "API request failed");
        return Err(ApiError::from_status(status, &body));
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Schema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_detail_string() {
        let body = r#"{"detail": "This poll does not exist."}"#;
        assert_eq!(
            extract_detail(body),
            Some("This poll does not exist.".to_string())
        );
    }

    #[test]
    fn test_extract_detail_validation_list() {
        let body = r#"{"detail": [
            {"loc": ["body", "options"], "msg": "List should have at least 2 items", "type": "too_short"},
            {"loc": ["body", "question"], "msg": "Field required", "type": "missing"}
        ]}"#;
        assert_eq!(
            extract_detail(body),
            Some("List should have at least 2 items; Field required".to_string())
        );
    }

    #[test]
    fn test_extract_detail_missing() {
        assert_eq!(extract_detail("not json"), None);
        assert_eq!(extract_detail(r#"{"error": "x"}"#), None);
        assert_eq!(extract_detail(r#"{"detail": ""}"#), None);
    }

    #[test]
    fn test_from_status_taxonomy() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, r#"{"detail": "Poll not found"}"#);
        assert_eq!(err, ApiError::NotFound("Poll not found".to_string()));
        assert!(err.is_terminal_for_view());

        let err = ApiError::from_status(StatusCode::FORBIDDEN, "");
        assert_eq!(err, ApiError::Forbidden("Access denied.".to_string()));
        assert!(err.is_terminal_for_view());

        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "{}");
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(!err.is_terminal_for_view());

        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "<html>");
        assert_eq!(
            err,
            ApiError::Unexpected {
                status: 502,
                message: "An unexpected error occurred.".to_string()
            }
        );
        assert!(err.is_terminal_for_view());
    }

    #[test]
    fn test_transport_and_shape_failures_end_the_view() {
        assert!(ApiError::Network("connection refused".to_string()).is_terminal_for_view());
        assert!(ApiError::Schema("missing field `votes`".to_string()).is_terminal_for_view());
        assert!(ApiError::InvalidUrl("relative URL".to_string()).is_terminal_for_view());
        assert!(!ApiError::Validation("Please select at least one option".to_string())
            .is_terminal_for_view());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_terminal() {
        let client = ApiClient::new("http://127.0.0.1:9/api", Some(Duration::from_secs(2))).unwrap();

        let err = client.get_results("sleepy-blue-toaster", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert!(err.is_terminal_for_view());
    }

    #[test]
    fn test_client_rejects_bad_base_url() {
        assert!(matches!(
            ApiClient::new("not a url", None),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            ApiClient::new("ftp://host/api", None),
            Err(ApiError::InvalidUrl(_))
        ));

        let client = ApiClient::new("http://localhost:8000/api/", None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(
            client.poll_url("sleepy-blue-toaster", "/results"),
            "http://localhost:8000/api/polls/sleepy-blue-toaster/results"
        );
    }

    #[tokio::test]
    async fn test_create_poll_validates_before_sending() {
        // Unroutable base: validation must fail before any request goes out.
        let client = ApiClient::new("http://127.0.0.1:9/api", None).unwrap();
        let poll = NewPoll::new("Only one?", "tok").with_options(["A"]);

        let err = client.create_poll(&poll).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
