//! Shared plumbing for JSON-over-HTTP provider adapters.

use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use ragchat_core::error::UpstreamError;

pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request and decode a successful JSON body into `T`.
///
/// Non-2xx statuses are classified with [`UpstreamError::from_status`];
/// transport failures (including client timeouts) become
/// [`UpstreamError::Network`]; undecodable bodies become
/// [`UpstreamError::Malformed`].
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, UpstreamError> {
    let response = request
        .send()
        .await
        .map_err(|e| UpstreamError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::from_status(status.as_u16(), truncate(&body)));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| UpstreamError::Network(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Malformed(e.to_string()))
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(500) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
