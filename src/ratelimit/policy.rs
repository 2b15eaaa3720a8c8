//! Preconfigured protection tiers.
//!
//! Every limiter produced here owns its own store and reclaim task; tiers
//! never share state, even when two of them are built from the same policy.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::limiter::{LimitConfig, RateLimiter};
use crate::config::RateLimitingConfig;
use crate::error::Result;

/// Fifteen minutes, in milliseconds.
const FIFTEEN_MINUTES_MS: u64 = 15 * 60 * 1000;
/// One minute, in milliseconds.
const ONE_MINUTE_MS: u64 = 60 * 1000;

/// A named protection tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Login, registration and similar credential endpoints: 5 per 15 minutes
    Authentication,
    /// Ordinary API traffic: 100 per 15 minutes
    GeneralApi,
    /// Expensive or sensitive endpoints: 10 per minute
    Strict,
}

impl Policy {
    /// All tiers, in declaration order.
    pub const ALL: [Policy; 3] = [Policy::Authentication, Policy::GeneralApi, Policy::Strict];

    /// The built-in limit for this tier.
    pub fn limit_config(&self) -> LimitConfig {
        match self {
            Policy::Authentication => LimitConfig::new(5, FIFTEEN_MINUTES_MS),
            Policy::GeneralApi => LimitConfig::new(100, FIFTEEN_MINUTES_MS),
            Policy::Strict => LimitConfig::new(10, ONE_MINUTE_MS),
        }
    }

    /// Short name used in logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Policy::Authentication => "authentication",
            Policy::GeneralApi => "general_api",
            Policy::Strict => "strict",
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Policy {
    type Err = crate::error::TollgateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "authentication" | "auth" => Ok(Policy::Authentication),
            "general_api" | "general" | "api" => Ok(Policy::GeneralApi),
            "strict" => Ok(Policy::Strict),
            other => Err(crate::error::TollgateError::Config(format!(
                "Unknown policy: {}",
                other
            ))),
        }
    }
}

impl RateLimiter {
    /// Build an inert limiter for a built-in tier.
    pub fn for_policy(policy: Policy) -> Self {
        RateLimiter::builder(policy.limit_config()).assemble()
    }
}

/// One independent limiter per tier.
#[derive(Debug)]
pub struct PolicySet {
    pub authentication: Arc<RateLimiter>,
    pub general_api: Arc<RateLimiter>,
    pub strict: Arc<RateLimiter>,
}

impl PolicySet {
    /// Build all tiers with their built-in limits.
    pub fn new() -> Self {
        Self {
            authentication: Arc::new(RateLimiter::for_policy(Policy::Authentication)),
            general_api: Arc::new(RateLimiter::for_policy(Policy::GeneralApi)),
            strict: Arc::new(RateLimiter::for_policy(Policy::Strict)),
        }
    }

    /// Build all tiers, applying any overrides from configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let reap_interval = Duration::from_millis(config.reap_interval_ms);
        let build = |policy: Policy| -> Result<Arc<RateLimiter>> {
            let limit = config.limit_for(policy);
            info!(
                policy = %policy,
                max_requests = limit.max_requests,
                window_ms = limit.window_ms,
                "Configuring rate limit tier"
            );
            RateLimiter::builder(limit)
                .reap_interval(reap_interval)
                .build()
                .map(Arc::new)
        };

        Ok(Self {
            authentication: build(Policy::Authentication)?,
            general_api: build(Policy::GeneralApi)?,
            strict: build(Policy::Strict)?,
        })
    }

    /// The limiter for a tier.
    pub fn get(&self, policy: Policy) -> &Arc<RateLimiter> {
        match policy {
            Policy::Authentication => &self.authentication,
            Policy::GeneralApi => &self.general_api,
            Policy::Strict => &self.strict,
        }
    }

    /// Start every tier's reclaim task.
    pub fn start(&self) -> Result<()> {
        for policy in Policy::ALL {
            self.get(policy).start()?;
        }
        Ok(())
    }

    /// Stop every tier's reclaim task and clear its state.
    pub fn stop(&self) {
        for policy in Policy::ALL {
            self.get(policy).stop();
        }
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_limits() {
        assert_eq!(
            Policy::Authentication.limit_config(),
            LimitConfig::new(5, 900_000)
        );
        assert_eq!(
            Policy::GeneralApi.limit_config(),
            LimitConfig::new(100, 900_000)
        );
        assert_eq!(Policy::Strict.limit_config(), LimitConfig::new(10, 60_000));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("auth".parse::<Policy>().unwrap(), Policy::Authentication);
        assert_eq!("General_API".parse::<Policy>().unwrap(), Policy::GeneralApi);
        assert_eq!("strict".parse::<Policy>().unwrap(), Policy::Strict);
        assert!("lenient".parse::<Policy>().is_err());
    }

    #[test]
    fn test_for_policy_enforces_tier_limit() {
        let limiter = RateLimiter::for_policy(Policy::Authentication);
        assert_eq!(limiter.config().max_requests, 5);

        for _ in 0..5 {
            assert!(limiter.try_acquire("client"));
        }
        assert!(!limiter.try_acquire("client"));
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let first = RateLimiter::for_policy(Policy::Strict);
        let second = RateLimiter::for_policy(Policy::Strict);

        for _ in 0..10 {
            assert!(first.try_acquire("client"));
        }
        assert!(!first.try_acquire("client"));
        assert!(second.try_acquire("client"));
        assert_eq!(second.log_len("client"), Some(1));
    }

    #[test]
    fn test_policy_set_from_config_applies_overrides() {
        let mut config = RateLimitingConfig::default();
        config.strict = Some(LimitConfig::new(2, 1_000));
        config.reap_interval_ms = 5_000;

        let set = PolicySet::from_config(&config).unwrap();
        assert_eq!(set.get(Policy::Strict).config(), LimitConfig::new(2, 1_000));
        assert_eq!(
            set.get(Policy::Authentication).config(),
            Policy::Authentication.limit_config()
        );
        assert_eq!(
            set.get(Policy::GeneralApi).reap_interval(),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn test_policy_set_rejects_invalid_override() {
        let mut config = RateLimitingConfig::default();
        config.authentication = Some(LimitConfig::new(0, 1_000));
        assert!(PolicySet::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_policy_set_lifecycle() {
        let set = PolicySet::new();
        set.start().unwrap();
        for policy in Policy::ALL {
            assert!(set.get(policy).is_running());
        }

        set.general_api.try_acquire("client");
        set.stop();
        for policy in Policy::ALL {
            assert!(!set.get(policy).is_running());
        }
        assert_eq!(set.general_api.tracked_keys(), 0);
    }
}
