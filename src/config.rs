//! Configuration loading, validation, and per-route limit policies.
//!
//! The admission binary reads its YAML configuration exactly once at
//! startup. The raw [`Config`] maps directly to the on-disk schema and is
//! validated into a [`RuntimeConfig`] that resolves the listen address and
//! rejects unusable values, so the request path never revalidates anything.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::limiter::CheckOptions;
use crate::{LimitError, Result};

/// Default per-IP limit per window.
pub const DEFAULT_IP_LIMIT: u32 = 60;

/// Default per-user limit per window.
pub const DEFAULT_USER_LIMIT: u32 = 45;

/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Default socket address the admission server binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8429";

/// Limit policy for one route (or the defaults applied everywhere else).
///
/// A zero limit disables that scope's check entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Maximum requests per window for the client-IP scope (default: 60).
    #[serde(default = "default_ip_limit")]
    pub per_ip: u32,
    /// Maximum requests per window for the user scope (default: 45).
    #[serde(default = "default_user_limit")]
    pub per_user: u32,
    /// Window length in milliseconds (default: 60000).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Feature name used in rejection messages for this route.
    #[serde(default)]
    pub feature: Option<String>,
}

fn default_ip_limit() -> u32 {
    DEFAULT_IP_LIMIT
}

fn default_user_limit() -> u32 {
    DEFAULT_USER_LIMIT
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            per_ip: default_ip_limit(),
            per_user: default_user_limit(),
            window_ms: default_window_ms(),
            feature: None,
        }
    }
}

impl LimitPolicy {
    /// Converts this policy into per-call check options. The user id is
    /// filled in by the handler once authentication has run.
    pub fn to_options(&self) -> CheckOptions {
        CheckOptions {
            limit_per_ip: self.per_ip,
            limit_per_user: self.per_user,
            window_ms: self.window_ms,
            path_override: None,
            user_id: None,
            feature: self.feature.clone(),
        }
    }
}

/// Raw configuration as deserialized from the YAML file.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Socket address the server listens on (default `"127.0.0.1:8429"`).
    #[serde(default)]
    pub listen: Option<String>,
    /// Limit policy applied to routes without an explicit override.
    #[serde(default)]
    pub defaults: LimitPolicy,
    /// Exact-path policy overrides.
    #[serde(default)]
    pub routes: BTreeMap<String, LimitPolicy>,
}

/// Fully validated, ready-to-use configuration.
///
/// Created once at startup and shared across all request handlers via `Arc`.
#[derive(Debug)]
pub struct RuntimeConfig {
    /// Socket address the server binds to.
    pub listen: SocketAddr,
    /// Limit policy applied to routes without an explicit override.
    pub defaults: LimitPolicy,
    /// Exact-path policy overrides.
    pub routes: BTreeMap<String, LimitPolicy>,
}

impl Config {
    /// Loads configuration from a YAML file at the given path.
    ///
    /// Returns a [`LimitError::Config`] if the file cannot be opened or its
    /// contents fail YAML deserialization.
    pub fn load_from_file(file_path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let file = std::fs::File::open(file_path).map_err(|e| {
            LimitError::Config(format!(
                "failed to open {}: {e}",
                file_path.as_ref().display()
            ))
        })?;

        serde_yaml::from_reader(file)
            .map_err(|e| LimitError::Config(format!("failed to parse config: {e}")))
    }

    /// Validates all fields, producing a [`RuntimeConfig`].
    ///
    /// Every policy's window must be positive; a zero window would make the
    /// bucket expire the instant it is created.
    pub fn into_runtime(self) -> Result<RuntimeConfig> {
        let listen_str = self.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let listen = listen_str.parse::<SocketAddr>().map_err(|e| {
            LimitError::Config(format!("invalid listen address \"{listen_str}\": {e}"))
        })?;

        validate_policy("defaults", &self.defaults)?;
        for (path, policy) in &self.routes {
            validate_policy(path, policy)?;
        }

        Ok(RuntimeConfig {
            listen,
            defaults: self.defaults,
            routes: self.routes,
        })
    }
}

fn validate_policy(name: &str, policy: &LimitPolicy) -> Result<()> {
    if policy.window_ms == 0 {
        return Err(LimitError::Config(format!(
            "policy \"{name}\": window_ms must be positive"
        )));
    }
    Ok(())
}

impl RuntimeConfig {
    /// Returns the check options for the given request path: the route's
    /// override when one exists, otherwise the defaults.
    pub fn options_for(&self, path: &str) -> CheckOptions {
        self.routes
            .get(path)
            .unwrap_or(&self.defaults)
            .to_options()
    }
}
