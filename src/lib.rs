//!
//! An in-process, dual-scope rate limiter for HTTP services, built on [Hyper].
//!
//! `tollgate` tracks fixed-window request counters keyed by client IP and,
//! optionally, by authenticated user id, so each user gets an independent
//! budget while a shared IP is still capped as a whole. State is
//! process-local and advisory: memory is bounded by opportunistic expiry
//! sweeps and a hard entry cap, and counters reset on process restart.
//!
//! A typical handler calls [`RateLimiter::check`] with the inbound request
//! and a [`CheckOptions`], then either proceeds (attaching the headers from
//! [`rate_limit_headers`]) or short-circuits with [`too_many_requests`].
//!
//! [Hyper]: https://hyper.rs/

pub mod config;
pub mod error;
pub mod ip;
pub mod limiter;
pub mod response;
pub mod store;

pub use config::{Config, LimitPolicy, RuntimeConfig};
pub use error::LimitError;
pub use ip::client_ip;
pub use limiter::{spawn_sweep, CheckOptions, RateLimitOutcome, RateLimiter};
pub use response::{apply_rate_limit_headers, rate_limit_headers, too_many_requests};
pub use store::{BucketStore, Consumed};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LimitError>;
