use crate::core::types::Alert;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Backoff schedule for transient delivery failures; after the last delay the
/// alert is dropped and logged.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Wait when a 429 arrives without a Retry-After header.
pub const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SinkError {
    /// 5xx or network failure; retry with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// 429; retry after the server-provided delay if any.
    #[error("rate limited")]
    RateLimited(Option<Duration>),
    /// Any other 4xx; do not retry.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// One outbound notification channel. Implementations format the alert for
/// their wire shape and classify the HTTP outcome for the retry loop.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    async fn deliver(&self, alert: &Alert) -> Result<(), SinkError>;
}

pub(crate) fn classify_response(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> Result<(), SinkError> {
    if status.is_success() {
        return Ok(());
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(SinkError::RateLimited(retry_after));
    }
    if status.is_client_error() {
        return Err(SinkError::Permanent(format!("{status}: {body}")));
    }
    Err(SinkError::Transient(format!("{status}: {body}")))
}

pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .map(Duration::from_secs_f64)
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn market_url(slug: Option<&str>) -> Option<String> {
    slug.map(|s| format!("https://polymarket.com/event/{s}"))
}

pub(crate) fn wallet_url(wallet: &str) -> String {
    format!("https://polygonscan.com/address/{wallet}")
}

pub(crate) fn short_wallet(wallet: &str) -> String {
    if wallet.len() > 10 {
        format!("{}...", &wallet[..10])
    } else {
        wallet.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
    use reqwest::StatusCode;

    #[test]
    fn test_classify_response() {
        assert!(classify_response(StatusCode::NO_CONTENT, None, String::new()).is_ok());
        assert!(classify_response(StatusCode::OK, None, String::new()).is_ok());

        match classify_response(StatusCode::INTERNAL_SERVER_ERROR, None, "oops".into()) {
            Err(SinkError::Transient(_)) => {}
            other => panic!("expected transient, got {other:?}"),
        }
        match classify_response(StatusCode::BAD_REQUEST, None, "bad".into()) {
            Err(SinkError::Permanent(_)) => {}
            other => panic!("expected permanent, got {other:?}"),
        }
        match classify_response(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            String::new(),
        ) {
            Err(SinkError::RateLimited(Some(d))) => assert_eq!(d, Duration::from_secs(7)),
            other => panic!("expected rate limited, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert!(parse_retry_after(&headers).is_none());
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("not-a-number"));
        assert!(parse_retry_after(&headers).is_none());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn test_links_and_wallet_shortening() {
        assert_eq!(
            market_url(Some("us-election-2026")).unwrap(),
            "https://polymarket.com/event/us-election-2026"
        );
        assert!(market_url(None).is_none());
        assert_eq!(short_wallet("0xdb27bf2ac5d428a9"), "0xdb27bf2a...");
        assert_eq!(short_wallet("0xab"), "0xab");
    }
}
