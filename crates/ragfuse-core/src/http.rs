//! HTTP plumbing shared by the embedding service, relevance judge and remote vector store clients.

use crate::error::RemoteError;
use crate::retry::{retry_async, RetryPolicy};
use serde::de::DeserializeOwned;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() {
            Self::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status { status: status.as_u16(), body: String::new() }
        } else if err.is_decode() || err.is_body() {
            Self::Decode(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Client with a per-request timeout applied to every call.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .build()
        .map_err(|e| RemoteError::Unavailable(format!("failed to build HTTP client: {e}")))
}

/// Joins a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Sends the request produced by `build`, maps non-2xx statuses to
/// [`RemoteError::Status`] and decodes the JSON body. Retryable failures are
/// retried under `policy`.
pub async fn send_json<T, F>(policy: &RetryPolicy, build: F) -> Result<T, RemoteError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let build = &build;
    retry_async(
        policy,
        move || async move {
            let response = build().send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RemoteError::Status { status: status.as_u16(), body: truncate(&body) });
            }
            response.json::<T>().await.map_err(|e| RemoteError::Decode(e.to_string()))
        },
        RemoteError::is_retryable,
    )
    .await
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h:1/", "/api/x"), "http://h:1/api/x");
        assert_eq!(join_url("http://h:1", "api/x"), "http://h:1/api/x");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let long = "x".repeat(2000);
        let cut = truncate(&long);
        assert_eq!(cut.len(), MAX_ERROR_BODY + 3);
        assert_eq!(truncate("short"), "short");
    }
}
