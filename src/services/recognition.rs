use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::job::MatchResult;

/// The face recognition service. It compares submitted images against a
/// per-session reference face, asynchronously: a batch submit returns a
/// handle which is then polled.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Submit one batch of base64 images; returns the remote job handle.
    async fn submit_batch(&self, session_id: &str, images: &[String]) -> Result<String, RecognitionError>;

    async fn job_status(&self, handle: &str) -> Result<RemoteJobStatus, RecognitionError>;

    async fn register_reference(&self, session_id: &str, image: &[u8]) -> Result<(), RecognitionError>;

    async fn clear_reference(&self, session_id: &str) -> Result<(), RecognitionError>;

    async fn health_check(&self) -> Result<(), RecognitionError>;
}

/// State of a remote sub-job. Unrecognized values are reported as
/// `Unknown` and treated as still running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Response of `GET /face/job-status/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    #[serde(default)]
    pub job_id: String,
    pub status: RemoteState,
    #[serde(default)]
    pub current_image: usize,
    #[serde(default)]
    pub total_images: usize,
    #[serde(default)]
    pub matches_found: usize,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub matches: Option<Vec<MatchResult>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize)]
struct CompareBatchRequest<'a> {
    session_id: &'a str,
    images: &'a [String],
}

#[derive(Deserialize)]
struct CompareBatchResponse {
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    session_id: &'a str,
    image: String,
}

#[derive(Deserialize)]
struct RegisterResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Error bodies the service may return: FastAPI's `{"detail": ...}` or
/// our own `{"error": ...}`.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the face recognition service.
pub struct FaceServiceClient {
    http: Client,
    base_url: String,
    submit_timeout: Duration,
    status_timeout: Duration,
}

impl FaceServiceClient {
    pub fn new(
        base_url: &str,
        submit_timeout: Duration,
        status_timeout: Duration,
    ) -> Result<Self, RecognitionError> {
        let http = Client::builder()
            .build()
            .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            submit_timeout,
            status_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RecognitionError> {
        let response = request.send().await.map_err(RecognitionError::from_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(RecognitionError::from_transport)?;

        if !status.is_success() {
            return Err(RecognitionError::from_response(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| RecognitionError::Parse(e.to_string()))
    }
}

#[async_trait]
impl RecognitionBackend for FaceServiceClient {
    async fn submit_batch(&self, session_id: &str, images: &[String]) -> Result<String, RecognitionError> {
        let request = self
            .http
            .post(self.url("/face/compare-batch"))
            .timeout(self.submit_timeout)
            .json(&CompareBatchRequest { session_id, images });

        let response: CompareBatchResponse = self.send_json(request).await?;
        if response.job_id.is_empty() {
            return Err(RecognitionError::Rejected(
                response
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "face comparison service returned no job id".to_string()),
            ));
        }
        Ok(response.job_id)
    }

    async fn job_status(&self, handle: &str) -> Result<RemoteJobStatus, RecognitionError> {
        let request = self
            .http
            .get(self.url(&format!("/face/job-status/{}", handle)))
            .timeout(self.status_timeout);
        self.send_json(request).await
    }

    async fn register_reference(&self, session_id: &str, image: &[u8]) -> Result<(), RecognitionError> {
        let request = self
            .http
            .post(self.url("/face/register"))
            .timeout(self.submit_timeout)
            .json(&RegisterRequest {
                session_id,
                image: base64::engine::general_purpose::STANDARD.encode(image),
            });

        let response: RegisterResponse = self.send_json(request).await?;
        if !response.success {
            return Err(RecognitionError::Rejected(
                response
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "registration failed".to_string()),
            ));
        }
        Ok(())
    }

    async fn clear_reference(&self, session_id: &str) -> Result<(), RecognitionError> {
        let response = self
            .http
            .delete(self.url(&format!("/face/session/{}", session_id)))
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(RecognitionError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::from_response(status, &body));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RecognitionError> {
        let response = self
            .http
            .get(self.url("/health"))
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(RecognitionError::from_transport)?;

        if !response.status().is_success() {
            return Err(RecognitionError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("face comparison service request timed out")]
    Timeout,

    #[error("face comparison service unavailable: {0}")]
    Unavailable(String),

    /// The service understood the request and refused it; carries its message.
    #[error("{0}")]
    Rejected(String),

    /// The service failed on its side (5xx other than 503).
    #[error("face comparison service error: {0}")]
    Backend(String),

    #[error("face comparison service returned status {0}")]
    Status(u16),

    #[error("failed to parse response from face comparison service: {0}")]
    Parse(String),
}

impl RecognitionError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RecognitionError::Timeout
        } else {
            RecognitionError::Unavailable(err.to_string())
        }
    }

    /// Only 4xx bodies are treated as the service refusing the request;
    /// 5xx bodies are server failures whatever their message.
    fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.detail.or(parsed.error))
            .filter(|m| !m.is_empty());

        match status {
            StatusCode::SERVICE_UNAVAILABLE => RecognitionError::Unavailable(
                message.unwrap_or_else(|| format!("status {}", status.as_u16())),
            ),
            s if s.is_client_error() => RecognitionError::Rejected(message.unwrap_or_else(|| match s {
                StatusCode::BAD_REQUEST => "invalid request to face comparison service".to_string(),
                StatusCode::NOT_FOUND => "session not found".to_string(),
                other => format!("face comparison service refused the request (status {})", other.as_u16()),
            })),
            s if s.is_server_error() => RecognitionError::Backend(
                message.unwrap_or_else(|| "face comparison service encountered an error".to_string()),
            ),
            other => RecognitionError::Status(other.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastapi_detail_preferred() {
        let err = RecognitionError::from_response(
            StatusCode::NOT_FOUND,
            r#"{"detail": "Session not found"}"#,
        );
        assert!(matches!(err, RecognitionError::Rejected(ref m) if m == "Session not found"));
    }

    #[test]
    fn test_custom_error_body() {
        let err = RecognitionError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"error": "No face detected in image"}"#,
        );
        assert_eq!(err.to_string(), "No face detected in image");
    }

    #[test]
    fn test_status_fallbacks() {
        assert!(matches!(
            RecognitionError::from_response(StatusCode::SERVICE_UNAVAILABLE, "upstream down"),
            RecognitionError::Unavailable(_)
        ));
        assert!(matches!(
            RecognitionError::from_response(StatusCode::BAD_GATEWAY, ""),
            RecognitionError::Backend(_)
        ));
        assert!(matches!(
            RecognitionError::from_response(StatusCode::NOT_FOUND, ""),
            RecognitionError::Rejected(ref m) if m == "session not found"
        ));
        assert!(matches!(
            RecognitionError::from_response(StatusCode::NOT_MODIFIED, ""),
            RecognitionError::Status(304)
        ));
    }

    #[test]
    fn test_server_errors_are_not_rejections() {
        let err = RecognitionError::from_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"detail": "Internal server error"}"#,
        );
        assert!(matches!(err, RecognitionError::Backend(ref m) if m == "Internal server error"));

        let err = RecognitionError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(
            err.to_string(),
            "face comparison service error: face comparison service encountered an error"
        );
    }

    #[test]
    fn test_remote_status_parsing() {
        let body = r#"{
            "job_id": "abc",
            "status": "completed",
            "progress": 100,
            "current_image": 3,
            "total_images": 3,
            "matches_found": 1,
            "message": "Completed! Found 1 matches",
            "matches": [{"index": 2, "distance": 0.41}],
            "error": null
        }"#;
        let status: RemoteJobStatus = serde_json::from_str(body).unwrap();
        assert_eq!(status.status, RemoteState::Completed);
        assert_eq!(status.matches.unwrap(), vec![MatchResult { index: 2, distance: 0.41 }]);
    }

    #[test]
    fn test_unknown_remote_state_tolerated() {
        let status: RemoteJobStatus =
            serde_json::from_str(r#"{"status": "queued", "current_image": 0}"#).unwrap();
        assert_eq!(status.status, RemoteState::Unknown);
        assert!(status.matches.is_none());
    }
}
