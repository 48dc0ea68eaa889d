// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;
use std::time::Duration;

use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Per-attempt timeout for ordinary (read-sized) RPCs.
pub(crate) const READ_TIMEOUT_SHORT: Duration = Duration::from_secs(30);

/// Server-side execution budget hinted on write commands.
pub(crate) const MAX_WRITE_EXECUTION_TIME: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct PlacementRetryConfig {
    /// How long to wait between reconnect attempts to the directory.
    pub reconnect_interval: Duration,
    /// How many rounds over the endpoint list before giving up.
    pub max_reconnect_attempts: usize,
}

impl Default for PlacementRetryConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// The configuration for a [`Client`](crate::Client).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub ca_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Timeout for connecting to cluster endpoints.
    pub timeout: Duration,
    pub placement_retry: PlacementRetryConfig,
    /// Region cache idle TTL base (see `region_cache_ttl_jitter`).
    pub region_cache_ttl: Duration,
    /// Adds jitter to the region cache TTL to avoid thundering herds.
    ///
    /// The real TTL is in range `[region_cache_ttl, region_cache_ttl +
    /// region_cache_ttl_jitter)`.
    pub region_cache_ttl_jitter: Duration,
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_REGION_CACHE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_REGION_CACHE_TTL_JITTER: Duration = Duration::from_secs(60);

impl Default for Config {
    fn default() -> Self {
        Config {
            ca_path: None,
            cert_path: None,
            key_path: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            placement_retry: PlacementRetryConfig::default(),
            region_cache_ttl: DEFAULT_REGION_CACHE_TTL,
            region_cache_ttl_jitter: DEFAULT_REGION_CACHE_TTL_JITTER,
        }
    }
}

impl Config {
    /// Set the certificate authority, certificate, and key locations.
    ///
    /// By default, connections are unprotected plaintext; deployments relying
    /// on a private network or VPN layer may choose to keep it that way. Use
    /// this to enable TLS for both the placement directory and the stores.
    #[must_use]
    pub fn with_security(
        mut self,
        ca_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.ca_path = Some(ca_path.into());
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self
    }

    /// Set the timeout for connecting to the cluster.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
