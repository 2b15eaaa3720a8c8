//! Configuration management for Tollgate.
//!
//! The limiter itself never reads files or the environment. This module is
//! only used by hosts (such as the bundled binary) that want to tune the
//! tiers without recompiling.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{LimitConfig, Policy};

/// Prefix for environment overrides, e.g. `TOLLGATE_SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for a Tollgate host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
///
/// Tiers left unset keep their built-in limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Period between reclaim sweeps in milliseconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,

    /// Override for the authentication tier
    #[serde(default)]
    pub authentication: Option<LimitConfig>,

    /// Override for the general API tier
    #[serde(default)]
    pub general_api: Option<LimitConfig>,

    /// Override for the strict tier
    #[serde(default)]
    pub strict: Option<LimitConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            reap_interval_ms: default_reap_interval(),
            authentication: None,
            general_api: None,
            strict: None,
        }
    }
}

fn default_reap_interval() -> u64 {
    60_000
}

impl RateLimitingConfig {
    /// The effective limit for a tier.
    pub fn limit_for(&self, policy: Policy) -> LimitConfig {
        let configured = match policy {
            Policy::Authentication => self.authentication,
            Policy::GeneralApi => self.general_api,
            Policy::Strict => self.strict,
        };
        configured.unwrap_or_else(|| policy.limit_config())
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file layered with
    /// `TOLLGATE_<SECTION>__<KEY>` environment variables, which win over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TollgateConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every configured limit.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.reap_interval_ms == 0 {
            return Err(TollgateError::Config(
                "reap_interval_ms must be greater than zero".to_string(),
            ));
        }
        for policy in Policy::ALL {
            self.rate_limiting.limit_for(policy).validate()?;
        }
        Ok(())
    }
}
