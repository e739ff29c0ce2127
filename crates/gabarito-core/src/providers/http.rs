//! HTTP status mapping for OpenAI-compatible endpoints.
//!
//! This is the ONLY place for status code handling. Chat and batch clients
//! call [`check_response`] and never interpret status codes themselves.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;

use crate::errors::ProviderError;

/// Bodies are truncated to this many chars in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Passes 2xx responses through; maps everything else to a [`ProviderError`].
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    Err(map_status(status, retry_after, &body))
}

pub(crate) fn map_status(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = error_message(body).unwrap_or_else(|| format!("HTTP {status}"));

    match status {
        429 if body.contains("insufficient_quota") => ProviderError::QuotaExhausted { message },
        429 => ProviderError::RateLimited { retry_after },
        401 | 403 => ProviderError::Unauthorized { status, message },
        408 => ProviderError::Timeout { message },
        400..=499 => ProviderError::InvalidRequest { status, message },
        500..=599 => ProviderError::Server { status, message },
        _ => ProviderError::InvalidResponse {
            message: format!("unexpected status {status}: {message}"),
        },
    }
}

/// Prefers `error.message` from an OpenAI error envelope, else the raw body.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let from_envelope = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        });
    Some(from_envelope.unwrap_or_else(|| trimmed.chars().take(MAX_ERROR_BODY).collect()))
}

pub(crate) fn bearer(api_key: &str) -> String {
    format!("Bearer {api_key}")
}
