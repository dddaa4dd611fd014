//! HTTP utilities for IBM Cloud REST API calls

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Leading text of every non-2xx error, followed by the status line
const FAILED_REQUEST_PREFIX: &str = "API request failed: ";

/// Per-request timeout so a hung call frees its worker slot eventually
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Truncate long bodies and drop control characters before logging
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper shared by every cloud call
#[derive(Clone)]
pub struct CloudHttpClient {
    client: Client,
}

impl CloudHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vpcsd/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GET with a bearer token and query parameters
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        tracing::debug!("GET {}", crate::mask::mask_url(url));

        let request = self.client.get(url).bearer_auth(token).query(query);
        self.send(request).await
    }

    /// GET with an arbitrary auth header (Vault uses `X-Vault-Token`)
    pub async fn get_json_with_header<T: DeserializeOwned>(
        &self,
        url: &str,
        header: &str,
        value: &str,
    ) -> Result<T> {
        tracing::debug!("GET {}", crate::mask::mask_url(url));

        let request = self.client.get(url).header(header, value);
        self.send(request).await
    }

    /// POST a form-encoded body
    pub async fn post_form<T: DeserializeOwned>(&self, url: &str, form: &[(&str, &str)]) -> Result<T> {
        tracing::debug!("POST {}", crate::mask::mask_url(url));

        let request = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form);
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Only the sanitized/truncated body is logged
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(anyhow::anyhow!("{}{}", FAILED_REQUEST_PREFIX, status));
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// HTTP status carried by a failed request anywhere in the error chain
pub fn status_of(error: &anyhow::Error) -> Option<u16> {
    error.chain().find_map(|cause| {
        let message = cause.to_string();
        let rest = message.strip_prefix(FAILED_REQUEST_PREFIX)?;
        rest.get(..3)?.parse().ok()
    })
}

/// User-facing summary of a cloud API error
///
/// Only the status class is surfaced; anything else is cut to a short,
/// printable prefix so response details do not end up on a terminal.
pub fn format_cloud_error(error: &anyhow::Error) -> String {
    if let Some(status) = status_of(error) {
        let hint = match status {
            401 => "Authentication failed. Check the API key for this account.",
            403 => "Permission denied. Check the IAM access policies of the API key.",
            404 => "Resource not found.",
            429 => "Rate limit exceeded. Lower max_concurrency or try again later.",
            400..=499 => "Invalid request. Check regions and resource group names.",
            500..=599 => "IBM Cloud service temporarily unavailable. Please try again.",
            _ => "Request failed. Check your network connection and try again.",
        };
        return hint.to_string();
    }

    let full = format!("{:#}", error);
    let printable: String = full
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect();

    if printable.len() < full.len() {
        format!("{}...", printable)
    } else {
        printable
    }
}
