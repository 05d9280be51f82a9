//! Shared test infrastructure for integration tests.
//!
//! Provides request builders and a synthetic peer address so individual
//! tests stay focused on limiter behavior.

#![allow(dead_code)]

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::Request;

/// A synthetic peer address used when no forwarding headers are set.
const TEST_PEER_ADDR: &str = "192.168.1.100:54321";

/// Initializes a tracing subscriber for test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

pub fn test_peer() -> SocketAddr {
    TEST_PEER_ADDR.parse().unwrap()
}

/// Builds a bodyless GET request to the given path with the given headers.
pub fn request(path: &str, headers: &[(&str, &str)]) -> Request<Empty<Bytes>> {
    let mut builder = Request::builder().uri(format!("http://localhost{path}"));
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Empty::new())
        .expect("test request must build")
}

/// Builds a request attributed to the given client IP via `x-forwarded-for`.
pub fn request_from_ip(path: &str, ip: &str) -> Request<Empty<Bytes>> {
    request(path, &[("x-forwarded-for", ip)])
}
