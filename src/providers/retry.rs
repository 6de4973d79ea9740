use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use super::ProviderKind;

/// Upper bound on how long a `Retry-After` hint may stall the fallback chain.
pub(crate) const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Only explicit throttling counts; overload and 5xx take the full chain.
pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if status.is_success() {
        return false;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    None
}

/// Waits out a provider's `Retry-After` hint (capped) before the next model
/// is tried. Returns the time actually waited.
pub(crate) async fn cooldown(provider: ProviderKind, retry_after: Option<Duration>) -> Duration {
    let Some(hint) = retry_after else {
        return Duration::ZERO;
    };
    let wait = hint.min(RATE_LIMIT_MAX_DELAY);
    if wait.is_zero() {
        return wait;
    }
    warn!(
        "{} rate limited; cooling down {:.1}s before downgrading model",
        provider,
        wait.as_secs_f32()
    );
    sleep(wait).await;
    wait
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn detects_explicit_throttling() {
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_rate_limited(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#
        ));
        assert!(!is_rate_limited(StatusCode::SERVICE_UNAVAILABLE, "overloaded"));
        assert!(!is_rate_limited(StatusCode::OK, "rate limit docs"));
    }

    #[test]
    fn parses_numeric_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn cooldown_without_hint_does_not_wait() {
        assert_eq!(cooldown(ProviderKind::Gemini, None).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_is_capped() {
        let waited = cooldown(ProviderKind::Gemini, Some(Duration::from_secs(600))).await;
        assert_eq!(waited, RATE_LIMIT_MAX_DELAY);
    }
}
