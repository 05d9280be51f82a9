//! Rate-limit response shaping: informational headers and the 429 builder.
//!
//! Emits the de-facto `X-RateLimit-*` convention plus `Retry-After` on
//! rejection. Success responses are the caller's responsibility; this
//! module only supplies headers to attach and a complete Too Many Requests
//! response for the rejection path.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::{Response, StatusCode};

use crate::limiter::RateLimitOutcome;

/// Builds the standard rate-limit header set for the given outcome.
///
/// `x-ratelimit-limit`, `x-ratelimit-remaining`, and `x-ratelimit-reset`
/// (epoch seconds) are present whenever at least one scope was evaluated;
/// `retry-after` is added only on rejection. An outcome with no evaluated
/// scopes yields an empty map.
pub fn rate_limit_headers(outcome: &RateLimitOutcome) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(limit) = outcome.limit {
        headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    }
    if let Some(remaining) = outcome.remaining {
        headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    }
    if let Some(reset_at_ms) = outcome.reset_at_ms {
        headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at_ms / 1000));
    }
    if !outcome.ok {
        if let Some(retry) = outcome.retry_after_secs {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry));
        }
    }

    headers
}

/// Attaches the rate-limit headers for `outcome` to an existing header map,
/// typically a success response being built by the caller.
pub fn apply_rate_limit_headers(target: &mut HeaderMap, outcome: &RateLimitOutcome) {
    for (name, value) in rate_limit_headers(outcome) {
        if let Some(name) = name {
            target.insert(name, value);
        }
    }
}

/// Builds a complete HTTP 429 response for a rejected outcome.
///
/// The JSON body carries a stable error code, the human-readable reason,
/// and the retry delay; the standard rate-limit headers are attached.
pub fn too_many_requests(outcome: &RateLimitOutcome) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Too many requests",
        "message": outcome
            .reason
            .as_deref()
            .unwrap_or("Too many requests for this endpoint."),
        "retryAfterSeconds": outcome.retry_after_secs.unwrap_or(1),
    });

    let mut builder = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header(CONTENT_TYPE, "application/json");

    if let Some(headers) = builder.headers_mut() {
        apply_rate_limit_headers(headers, outcome);
    }

    builder
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .body(Full::new(Bytes::new()))
                .expect("building fallback response must not fail")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passed_outcome() -> RateLimitOutcome {
        RateLimitOutcome {
            ok: true,
            limit: Some(60),
            remaining: Some(41),
            reset_at_ms: Some(1_700_000_123_000),
            retry_after_secs: Some(60),
            reason: None,
        }
    }

    fn rejected_outcome() -> RateLimitOutcome {
        RateLimitOutcome {
            ok: false,
            limit: Some(5),
            remaining: Some(0),
            reset_at_ms: Some(1_700_000_123_000),
            retry_after_secs: Some(17),
            reason: Some("Too many requests for search. Try again in 17s.".into()),
        }
    }

    #[test]
    fn success_headers_omit_retry_after() {
        let headers = rate_limit_headers(&passed_outcome());

        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "60");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "41");
        assert_eq!(headers.get("x-ratelimit-reset").unwrap(), "1700000123");
        assert!(!headers.contains_key(RETRY_AFTER));
    }

    #[test]
    fn rejection_headers_include_retry_after() {
        let headers = rate_limit_headers(&rejected_outcome());

        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(headers.get(RETRY_AFTER).unwrap(), "17");
    }

    #[test]
    fn unevaluated_outcome_yields_no_headers() {
        let outcome = RateLimitOutcome {
            ok: true,
            limit: None,
            remaining: None,
            reset_at_ms: None,
            retry_after_secs: None,
            reason: None,
        };
        assert!(rate_limit_headers(&outcome).is_empty());
    }

    #[test]
    fn apply_headers_extends_existing_map() {
        let mut target = HeaderMap::new();
        target.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        apply_rate_limit_headers(&mut target, &passed_outcome());

        assert_eq!(target.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(target.get("x-ratelimit-limit").unwrap(), "60");
    }

    #[test]
    fn too_many_requests_has_status_headers_and_json_body() {
        let resp = too_many_requests(&rejected_outcome());

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(resp.headers().get(RETRY_AFTER).unwrap(), "17");
        assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "5");
    }

    #[tokio::test]
    async fn too_many_requests_body_shape() {
        use http_body_util::BodyExt;

        let resp = too_many_requests(&rejected_outcome());
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("body must collect")
            .to_bytes();
        let json: serde_json::Value =
            serde_json::from_slice(&bytes).expect("body must be valid JSON");

        assert_eq!(json["error"], "Too many requests");
        assert_eq!(
            json["message"],
            "Too many requests for search. Try again in 17s."
        );
        assert_eq!(json["retryAfterSeconds"], 17);
    }
}
