//! Dual-scope rate limit checks and the background sweep task.
//!
//! A single check consumes from up to two buckets: one keyed by client IP
//! and one keyed by authenticated user id, each with its own limit. The two
//! outcomes are merged into one pass/fail decision where the most
//! restrictive scope wins for display and the slowest-to-reset scope wins
//! for the retry delay.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hyper::header::HeaderMap;
use hyper::Request;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_IP_LIMIT, DEFAULT_USER_LIMIT, DEFAULT_WINDOW_MS};
use crate::ip::client_ip;
use crate::store::{BucketStore, Consumed};

/// Per-call rate limit configuration.
///
/// All fields have defaults; a zero limit disables that scope's check
/// entirely (the scope is excluded from the decision, not treated as a
/// zero-capacity bucket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOptions {
    /// Maximum requests per window for the client-IP scope (default: 60).
    pub limit_per_ip: u32,
    /// Maximum requests per window for the user scope (default: 45).
    pub limit_per_user: u32,
    /// Window length in milliseconds (default: 60 000).
    pub window_ms: u64,
    /// Overrides the request URI path in bucket keys. Useful when several
    /// routes share one budget.
    pub path_override: Option<String>,
    /// The authenticated user id. `None`, empty, or whitespace-only skips
    /// the user scope.
    pub user_id: Option<String>,
    /// Human-readable feature name used in rejection messages
    /// (default: "this endpoint").
    pub feature: Option<String>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            limit_per_ip: DEFAULT_IP_LIMIT,
            limit_per_user: DEFAULT_USER_LIMIT,
            window_ms: DEFAULT_WINDOW_MS,
            path_override: None,
            user_id: None,
            feature: None,
        }
    }
}

/// The merged decision across whichever scopes were evaluated.
///
/// Callers must check [`ok`](Self::ok) explicitly; rejection is a normal
/// return value, never an error. When both scopes are disabled the check
/// passes unconditionally and every merged field is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOutcome {
    /// `true` only if every evaluated scope allowed the request.
    pub ok: bool,
    /// The most restrictive limit among evaluated scopes.
    pub limit: Option<u32>,
    /// The lowest remaining budget among evaluated scopes.
    pub remaining: Option<u32>,
    /// The earliest window reset among evaluated scopes, epoch milliseconds.
    pub reset_at_ms: Option<u64>,
    /// The longest retry delay among evaluated scopes, in seconds.
    pub retry_after_secs: Option<u64>,
    /// Human-readable rejection message. `None` when the request passed.
    pub reason: Option<String>,
}

/// A thread-safe, dual-scope fixed-window rate limiter.
///
/// Owns a [`BucketStore`] behind a mutex and is shared across request
/// handlers via `Arc`. The lock is held for the whole read-modify-write of
/// a check, so enforcement is exact within one process. Independent
/// processes limit independently: the effective global limit is the
/// per-instance limit times the instance count.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<Mutex<BucketStore>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in epoch milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl RateLimiter {
    /// Creates a limiter with the default store thresholds.
    pub fn new() -> Self {
        Self::with_store(BucketStore::new())
    }

    /// Creates a limiter around an explicitly constructed store.
    pub fn with_store(store: BucketStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Checks the given request against the configured limits using the
    /// current wall-clock time.
    pub fn check<B>(
        &self,
        req: &Request<B>,
        peer: Option<SocketAddr>,
        opts: &CheckOptions,
    ) -> RateLimitOutcome {
        self.check_at(req, peer, opts, now_millis())
    }

    /// Checks the given request at an explicit point in time.
    ///
    /// The clock parameter exists so callers can drive window expiry
    /// deterministically; [`check`](Self::check) is the production entry
    /// point.
    pub fn check_at<B>(
        &self,
        req: &Request<B>,
        peer: Option<SocketAddr>,
        opts: &CheckOptions,
        now_ms: u64,
    ) -> RateLimitOutcome {
        self.check_parts(req.uri().path(), req.headers(), peer, opts, now_ms)
    }

    /// Checks a request given its already-extracted path and headers.
    pub fn check_parts(
        &self,
        request_path: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        opts: &CheckOptions,
        now_ms: u64,
    ) -> RateLimitOutcome {
        let path = opts.path_override.as_deref().unwrap_or(request_path);
        let user_id = opts
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let mut checks: Vec<Consumed> = Vec::with_capacity(2);
        {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());

            if opts.limit_per_ip > 0 {
                let ip = client_ip(headers, peer);
                checks.push(store.consume(
                    format!("ip:{path}:{ip}"),
                    opts.limit_per_ip,
                    opts.window_ms,
                    now_ms,
                ));
            }

            if opts.limit_per_user > 0 {
                if let Some(user) = user_id {
                    checks.push(store.consume(
                        format!("user:{path}:{user}"),
                        opts.limit_per_user,
                        opts.window_ms,
                        now_ms,
                    ));
                }
            }
        }

        let outcome = merge(&checks, opts.feature.as_deref());
        if outcome.ok {
            debug!(path, remaining = ?outcome.remaining, "rate limit check passed");
        } else {
            warn!(
                path,
                retry_after_secs = ?outcome.retry_after_secs,
                "rate limit exceeded"
            );
        }
        outcome
    }

    /// Returns the number of buckets currently tracked.
    pub fn tracked_bucket_count(&self) -> usize {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Runs one bounded expiry sweep at the current time, returning the
    /// number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sweep_expired(now_millis())
    }
}

/// Merges per-scope outcomes into one decision.
///
/// The most restrictive scope wins for `limit`, `remaining`, and `reset_at`;
/// the slowest-to-reset scope wins for `retry_after_secs`. With no evaluated
/// scopes the check passes unconditionally.
fn merge(checks: &[Consumed], feature: Option<&str>) -> RateLimitOutcome {
    if checks.is_empty() {
        return RateLimitOutcome {
            ok: true,
            limit: None,
            remaining: None,
            reset_at_ms: None,
            retry_after_secs: None,
            reason: None,
        };
    }

    let ok = checks.iter().all(|c| c.ok);
    let limit = checks.iter().map(|c| c.limit).min();
    let remaining = checks.iter().map(|c| c.remaining).min();
    let reset_at_ms = checks.iter().map(|c| c.reset_at_ms).min();
    let retry_after_secs = checks.iter().map(|c| c.retry_after_secs).max();

    let reason = if ok {
        None
    } else {
        let feature = feature.unwrap_or("this endpoint");
        let retry = retry_after_secs.unwrap_or(1);
        Some(format!(
            "Too many requests for {feature}. Try again in {retry}s."
        ))
    };

    RateLimitOutcome {
        ok,
        limit,
        remaining,
        reset_at_ms,
        retry_after_secs,
        reason,
    }
}

/// Spawns a background task that periodically prunes expired buckets,
/// keeping the store small even when traffic stops and the in-path sweep
/// never triggers.
pub fn spawn_sweep(limiter: RateLimiter, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let removed = limiter.sweep_expired();
            if removed > 0 {
                info!(
                    removed,
                    tracked = limiter.tracked_bucket_count(),
                    "rate limiter sweep completed"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_of_nothing_passes_with_no_fields() {
        let outcome = merge(&[], None);
        assert!(outcome.ok);
        assert_eq!(outcome.limit, None);
        assert_eq!(outcome.remaining, None);
        assert_eq!(outcome.reset_at_ms, None);
        assert_eq!(outcome.retry_after_secs, None);
        assert_eq!(outcome.reason, None);
    }

    #[test]
    fn merge_takes_most_restrictive_for_display() {
        let checks = vec![
            Consumed {
                ok: true,
                limit: 60,
                remaining: 40,
                reset_at_ms: 90_000,
                retry_after_secs: 30,
            },
            Consumed {
                ok: true,
                limit: 45,
                remaining: 44,
                reset_at_ms: 60_000,
                retry_after_secs: 60,
            },
        ];

        let outcome = merge(&checks, None);
        assert!(outcome.ok);
        assert_eq!(outcome.limit, Some(45));
        assert_eq!(outcome.remaining, Some(40));
        assert_eq!(outcome.reset_at_ms, Some(60_000));
        assert_eq!(outcome.retry_after_secs, Some(60));
    }

    #[test]
    fn merge_rejects_if_any_scope_rejects() {
        let checks = vec![
            Consumed {
                ok: false,
                limit: 2,
                remaining: 0,
                reset_at_ms: 60_000,
                retry_after_secs: 42,
            },
            Consumed {
                ok: true,
                limit: 5,
                remaining: 3,
                reset_at_ms: 60_000,
                retry_after_secs: 60,
            },
        ];

        let outcome = merge(&checks, Some("media uploads"));
        assert!(!outcome.ok);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("Too many requests for media uploads. Try again in 60s.")
        );
    }

    #[test]
    fn rejection_reason_defaults_feature_name() {
        let checks = vec![Consumed {
            ok: false,
            limit: 1,
            remaining: 0,
            reset_at_ms: 60_000,
            retry_after_secs: 7,
        }];

        let outcome = merge(&checks, None);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("Too many requests for this endpoint. Try again in 7s.")
        );
    }
}
