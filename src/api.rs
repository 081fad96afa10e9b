//! Shop server API client.
//!
//! Authenticated HTTP communication with the hosted record store, used for
//! connectivity testing. The per-entity-kind load/replace calls the sync
//! engine makes live in [`crate::store`]; both share the URL normalization
//! and error mapping defined here.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::info;

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// API key header the shop server expects.
pub const API_KEY_HEADER: &str = "X-Shop-API-Key";

/// Shop id header, required alongside the key for multi-shop servers.
pub const SHOP_ID_HEADER: &str = "x-shop-id";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the shop server URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_server_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message. Works for both
/// the async and blocking clients (they share the error type).
pub(crate) fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach shop server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid shop server URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
pub(crate) fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Shop not authorized".to_string(),
        404 => "Shop server endpoint not found".to_string(),
        409 => "Record already exists".to_string(),
        s if s >= 500 => format!("Shop server error (HTTP {s})"),
        s => format!("Unexpected response from shop server (HTTP {s})"),
    }
}

/// Extract the most specific error message out of a non-2xx response body.
pub(crate) fn response_error_detail(status: StatusCode, body_text: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        let message = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| status_error(status));
        if let Some(details) = json.get("details").or_else(|| json.get("errors")) {
            return format!("{message} (HTTP {}): {}", status.as_u16(), details);
        }
        if !body_text.trim().is_empty() && body_text.trim() != message {
            return format!("{message} (HTTP {}): {}", status.as_u16(), body_text.trim());
        }
        return format!("{message} (HTTP {})", status.as_u16());
    }
    if !body_text.trim().is_empty() {
        return format!(
            "{} (HTTP {}): {}",
            status_error(status),
            status.as_u16(),
            body_text.trim()
        );
    }
    format!("{} (HTTP {})", status_error(status), status.as_u16())
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Test connectivity to the shop server with a lightweight health-check.
pub async fn test_connectivity(server_url: &str, api_key: &str) -> ConnectivityResult {
    let url = normalize_server_url(server_url);
    let health_url = format!("{url}/api/health");

    let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(format!("Failed to create HTTP client: {e}")),
            };
        }
    };

    let start = Instant::now();

    let resp = match client
        .get(&health_url)
        .header(API_KEY_HEADER, api_key.trim())
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(friendly_error(&url, &e)),
            };
        }
    };

    let latency = start.elapsed().as_millis() as u64;
    let status = resp.status();

    if status.is_success() {
        info!(latency_ms = latency, "connectivity test passed");
        ConnectivityResult {
            success: true,
            latency_ms: Some(latency),
            error: None,
        }
    } else {
        ConnectivityResult {
            success: false,
            latency_ms: Some(latency),
            error: Some(status_error(status)),
        }
    }
}
