//! HTTP client for the `yatra-api` endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::transport::{SyncTransport, TransportError, TransportResult};
use crate::models::{Checkpoint, Participant, ScanCursor, ScanLogPage, ScanSubmission, SubmitReceipt};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    device_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field(
                "device_key",
                &self.device_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// `timeout` bounds every request, including reading the body.
    pub fn new(
        base_url: impl Into<String>,
        device_key: Option<String>,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                TransportError::Validation(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url,
            device_key: normalize_text_option(device_key),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match self.device_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> TransportResult<T> {
        let response = self
            .authorize(self.client.get(self.url(path)).query(query))
            .send()
            .await
            .map_err(request_failed)?;
        decode(response).await
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn submit_scan(&self, submission: &ScanSubmission) -> TransportResult<SubmitReceipt> {
        let response = self
            .authorize(self.client.post(self.url("/v1/scans")).json(submission))
            .send()
            .await
            .map_err(request_failed)?;
        decode(response).await
    }

    async fn list_participants(&self) -> TransportResult<Vec<Participant>> {
        self.get_json("/v1/participants", &[]).await
    }

    async fn list_checkpoints(&self) -> TransportResult<Vec<Checkpoint>> {
        self.get_json("/v1/checkpoints", &[]).await
    }

    async fn list_scan_logs(
        &self,
        since: ScanCursor,
        limit: usize,
    ) -> TransportResult<ScanLogPage> {
        self.get_json(
            "/v1/scans",
            &[("since", since.to_string()), ("limit", limit.to_string())],
        )
        .await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> TransportResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|error| TransportError::Transient(format!("invalid response body: {error}")));
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

/// Network-level failures (connect, timeout, reset) are always retryable.
fn request_failed(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Transient("request timed out".to_string())
    } else {
        TransportError::Transient(format!("request failed: {error}"))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let message = api_error_message(status, body);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            TransportError::Validation(message)
        }
        // Scans stay queued until the device key is fixed.
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::Transient(format!("device not authorized: {message}"))
        }
        StatusCode::CONFLICT => TransportError::Conflict(message),
        _ => TransportError::Transient(message),
    }
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> TransportResult<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| TransportError::Validation("API URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::Validation(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}
