//! Shared HTTP plumbing for provider adapters

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::error::{Error, Result};

/// Request timeout when the caller sets none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client with a request timeout
pub fn client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("finsync/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Normalize a base URL so paths can be appended with `format!`
pub fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Pass successful responses through; turn the rest into typed errors.
///
/// A 404 becomes `NotFound`, everything else `Upstream` with the status and
/// (truncated) body attached for server-side logs.
pub async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = truncate(body.trim(), 500);

    if status == StatusCode::NOT_FOUND {
        return Err(Error::not_found(format!("{}: {}", what, body)));
    }

    Err(Error::upstream(format!("{} failed with {}: {}", what, status, body)))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
