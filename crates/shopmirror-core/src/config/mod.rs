//! Mirror configuration.
//!
//! `MirrorConfig` is the single JSON document the CLI loads and the
//! [`SyncContext`](crate::SyncContext) is built from: where the remote lives,
//! where the local store lives, sync cadence and the collection registry.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::StoreLocation;
use crate::error::{Error, Result};
use crate::models::{CollectionRegistry, CollectionSpec};
use crate::remote::RealtimeDbClient;
use crate::sync::ResubscribePolicy;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_PULL_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_STORE_VERSION: u32 = 1;

/// Runtime configuration for one mirrored database.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Base URL of the realtime database, e.g. `https://shop.firebaseio.com`
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Local store file; in-memory when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_pull_interval_secs")]
    pub pull_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Bump when `collections` gains entries so the local store creates them
    #[serde(default = "default_store_version")]
    pub store_version: u32,
    #[serde(default = "crate::models::default_collections")]
    pub collections: Vec<CollectionSpec>,
    #[serde(default)]
    pub resubscribe: ResubscribeConfig,
}

impl std::fmt::Debug for MirrorConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MirrorConfig")
            .field("remote_url", &self.remote_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("database_path", &self.database_path)
            .field("pull_interval_secs", &self.pull_interval_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("store_version", &self.store_version)
            .field("collections", &self.collections)
            .field("resubscribe", &self.resubscribe)
            .finish()
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            auth_token: None,
            database_path: None,
            pull_interval_secs: DEFAULT_PULL_INTERVAL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            store_version: DEFAULT_STORE_VERSION,
            collections: crate::models::default_collections(),
            resubscribe: ResubscribeConfig::default(),
        }
    }
}

/// Realtime resubscription settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ResubscribeConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for ResubscribeConfig {
    fn default() -> Self {
        Self::from(ResubscribePolicy::default())
    }
}

impl From<ResubscribePolicy> for ResubscribeConfig {
    fn from(policy: ResubscribePolicy) -> Self {
        Self {
            initial_delay_ms: u64::try_from(policy.initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(policy.max_delay.as_millis()).unwrap_or(u64::MAX),
            breaker_threshold: policy.breaker_threshold,
            breaker_cooldown_secs: policy.breaker_cooldown.as_secs(),
        }
    }
}

impl ResubscribeConfig {
    pub const fn policy(&self) -> ResubscribePolicy {
        ResubscribePolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            breaker_threshold: self.breaker_threshold,
            breaker_cooldown: Duration::from_secs(self.breaker_cooldown_secs),
        }
    }
}

impl MirrorConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = normalize_text_option(self.remote_url.clone()) {
            if !is_http_url(&url) {
                return Err(Error::Config(
                    "remote_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.pull_interval_secs == 0 {
            return Err(Error::Config("pull_interval_secs must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be positive".into()));
        }
        if self.store_version == 0 {
            return Err(Error::Config("store_version must be at least 1".into()));
        }

        let resubscribe = &self.resubscribe;
        if resubscribe.initial_delay_ms == 0 || resubscribe.initial_delay_ms > resubscribe.max_delay_ms
        {
            return Err(Error::Config(
                "resubscribe delays must satisfy 0 < initial_delay_ms <= max_delay_ms".into(),
            ));
        }
        if resubscribe.breaker_threshold == 0 {
            return Err(Error::Config(
                "resubscribe.breaker_threshold must be positive".into(),
            ));
        }

        self.registry().map(|_| ())
    }

    pub fn registry(&self) -> Result<CollectionRegistry> {
        CollectionRegistry::new(self.collections.clone())
    }

    pub const fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub const fn resubscribe_policy(&self) -> ResubscribePolicy {
        self.resubscribe.policy()
    }

    pub fn store_location(&self) -> StoreLocation {
        self.database_path
            .clone()
            .map_or(StoreLocation::Memory, StoreLocation::File)
    }

    /// HTTP client for the configured remote.
    pub fn remote_client(&self) -> Result<RealtimeDbClient> {
        let url = normalize_text_option(self.remote_url.clone())
            .ok_or_else(|| Error::Config("remote_url is not configured".to_string()))?;
        RealtimeDbClient::new(url, self.auth_token.clone())
    }
}

const fn default_pull_interval_secs() -> u64 {
    DEFAULT_PULL_INTERVAL_SECS
}

const fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

const fn default_store_version() -> u32 {
    DEFAULT_STORE_VERSION
}
