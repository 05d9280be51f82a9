//! Error types for the configuration layer.
//!
//! The limiter itself has no failure path: every input is handled by a
//! defined branch, and a rejected request is a normal return value
//! (`RateLimitOutcome::ok == false`), never an error. Only loading and
//! validating configuration can fail.

use std::fmt;

/// Every failure the crate can produce.
#[derive(Debug)]
pub enum LimitError {
    /// The configuration file could not be loaded or parsed.
    Config(String),
}

impl fmt::Display for LimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for LimitError {}
