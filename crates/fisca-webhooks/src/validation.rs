//! Subscription input validation.
//!
//! Configuration errors are rejected here, at create/update time, so they
//! never reach the dispatch pipeline: URL scheme and SSRF screening, event
//! set checks, retry policy bounds, and static header names.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::error::WebhookError;
use crate::models::{RetryPolicy, WebhookEventType};

/// Header names a subscription may not override.
const RESERVED_HEADERS: &[&str] = &["content-type", "user-agent"];

// ---------------------------------------------------------------------------
// URL + SSRF
// ---------------------------------------------------------------------------

/// Validate a delivery URL: parseable, HTTPS (HTTP only when `allow_http`
/// is set for dev/test), and not pointed at an internal address.
pub fn validate_url(raw: &str, allow_http: bool) -> Result<(), WebhookError> {
    if raw.trim().is_empty() {
        return Err(WebhookError::InvalidUrl("URL must not be empty".to_string()));
    }

    let parsed = url::Url::parse(raw)
        .map_err(|e| WebhookError::InvalidUrl(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "webhook URLs must use HTTPS".to_string(),
            ));
        }
        other => {
            return Err(WebhookError::InvalidUrl(format!(
                "unsupported URL scheme: {other}"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    screen_host(host)
}

/// Reject hosts that resolve into private or infrastructure address
/// space. Blocks loopback, RFC1918, link-local (cloud metadata), CGNAT,
/// and well-known internal hostnames.
fn screen_host(host: &str) -> Result<(), WebhookError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        let internal = match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_unspecified()
                    // 100.64.0.0/10 (CGNAT)
                    || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
            }
            IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
        if internal {
            return Err(WebhookError::SsrfDetected(format!(
                "host {host} is a private or internal address"
            )));
        }
        return Ok(());
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost"
        || lower == "metadata.google.internal"
        || lower.ends_with(".internal")
        || lower.ends_with(".local")
    {
        return Err(WebhookError::SsrfDetected(format!(
            "host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Event set
// ---------------------------------------------------------------------------

/// Validate the subscribed event set: non-empty, every name known.
pub fn validate_events(events: &[String]) -> Result<(), WebhookError> {
    if events.is_empty() {
        return Err(WebhookError::Validation(
            "event set must not be empty".to_string(),
        ));
    }
    for event in events {
        if WebhookEventType::parse(event).is_none() {
            return Err(WebhookError::Validation(format!(
                "unknown event type: {event}"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Validate retry policy bounds: `max_retries ≥ 0`,
/// `initial_delay_ms ≥ 1000`, `backoff_multiplier ≥ 1`.
pub fn validate_retry_policy(policy: &RetryPolicy) -> Result<(), WebhookError> {
    if policy.max_retries < 0 {
        return Err(WebhookError::Validation(
            "max_retries must not be negative".to_string(),
        ));
    }
    if policy.initial_delay_ms < 1000 {
        return Err(WebhookError::Validation(
            "initial_delay_ms must be at least 1000".to_string(),
        ));
    }
    if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
        return Err(WebhookError::Validation(
            "backoff_multiplier must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Static headers
// ---------------------------------------------------------------------------

/// Validate subscription-configured static headers. Names must be valid
/// HTTP tokens and may not shadow the engine's own headers.
pub fn validate_headers(headers: &HashMap<String, String>) -> Result<(), WebhookError> {
    for (name, value) in headers {
        if name.is_empty() || !name.chars().all(is_header_name_char) {
            return Err(WebhookError::Validation(format!(
                "invalid header name: {name:?}"
            )));
        }
        let lower = name.to_ascii_lowercase();
        if RESERVED_HEADERS.contains(&lower.as_str()) || lower.starts_with("x-webhook-") {
            return Err(WebhookError::Validation(format!(
                "header {name} is reserved"
            )));
        }
        if value.chars().any(|c| c == '\r' || c == '\n') {
            return Err(WebhookError::Validation(format!(
                "header {name} value contains line breaks"
            )));
        }
    }
    Ok(())
}

fn is_header_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
