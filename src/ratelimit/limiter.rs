//! Core sliding-window rate limiter.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::fingerprint::{resolve_key, KeyExtractor, RequestInfo};
use super::log::RequestLog;
use super::reaper::{self, Reaper};
use crate::error::{Result, TollgateError};

/// Default period between reclaim sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Limit parameters for one limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum requests admitted per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl LimitConfig {
    /// Create a limit of `max_requests` per `window_ms` milliseconds.
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    /// Reject zero counts and zero-length windows.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(TollgateError::InvalidLimit(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(TollgateError::InvalidLimit(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if self.window_ms > i64::MAX as u64 / 2 {
            return Err(TollgateError::InvalidLimit(format!(
                "window_ms {} is too large",
                self.window_ms
            )));
        }
        Ok(())
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// State shared between a limiter and its reclaim task.
pub(crate) struct Shared {
    pub(crate) config: LimitConfig,
    pub(crate) store: DashMap<String, RequestLog>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Shared {
    fn window_start(&self) -> i64 {
        self.clock.now_ms() - self.config.window_ms as i64
    }
}

/// An in-process sliding-window-log rate limiter.
///
/// Each key keeps the instants of its accepted requests. A request is
/// admitted while fewer than `max_requests` of those instants fall strictly
/// after `now - window_ms`. The store is sharded, so unrelated keys do not
/// contend, and every decision for a key runs under that key's entry lock.
///
/// Construction is inert. Call [`RateLimiter::start`] to begin periodic
/// reclaiming of idle keys and [`RateLimiter::stop`] (or drop the limiter)
/// to end it.
pub struct RateLimiter {
    shared: Arc<Shared>,
    key_extractor: Option<Arc<dyn KeyExtractor>>,
    reap_interval: Duration,
    reaper: Mutex<Option<Reaper>>,
}

impl RateLimiter {
    /// Create a limiter with the system clock and default fingerprinting.
    pub fn new(config: LimitConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a limiter for `config`.
    pub fn builder(config: LimitConfig) -> RateLimiterBuilder {
        RateLimiterBuilder::new(config)
    }

    /// The limit this instance enforces.
    pub fn config(&self) -> LimitConfig {
        self.shared.config
    }

    /// Period between reclaim sweeps.
    pub fn reap_interval(&self) -> Duration {
        self.reap_interval
    }

    /// Slide the window for `key` and report whether another request fits.
    ///
    /// The result is cached on the key's log and consulted by
    /// [`RateLimiter::record`].
    pub fn is_admitted(&self, key: &str) -> bool {
        let window_start = self.shared.window_start();
        let max_requests = self.shared.config.max_requests;
        let admitted = self.with_log(key, |log| log.evaluate(window_start, max_requests));

        trace!(key = %key, admitted, "Checked admission");
        admitted
    }

    /// Record a request for `key` unless its last check denied it.
    ///
    /// Denied attempts are never logged, so a client hammering a closed
    /// window does not extend its own block.
    pub fn record(&self, key: &str) {
        let now = self.shared.clock.now_ms();
        self.with_log(key, |log| {
            if !log.is_blocked() {
                log.push(now);
            }
        });
    }

    /// Check and record in one step under the key's lock.
    ///
    /// Returns `true` when the request is admitted and recorded. Concurrent
    /// callers for the same key are serialized, so no more than
    /// `max_requests` are admitted per window.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = self.shared.clock.now_ms();
        let window_start = now - self.shared.config.window_ms as i64;
        let max_requests = self.shared.config.max_requests;

        let (admitted, active) = self.with_log(key, |log| {
            let admitted = log.evaluate(window_start, max_requests);
            if admitted {
                log.push(now);
            }
            (admitted, log.len())
        });

        if admitted {
            trace!(key = %key, active, limit = max_requests, "Request admitted");
        } else {
            debug!(
                key = %key,
                active,
                limit = max_requests,
                window_ms = self.shared.config.window_ms,
                "Rate limit exceeded"
            );
        }
        admitted
    }

    /// Derive the key for a request.
    ///
    /// Uses the configured extractor when present, otherwise the default
    /// address and user-agent fingerprint.
    pub fn fingerprint(&self, request: &RequestInfo<'_>) -> String {
        resolve_key(self.key_extractor.as_deref(), request)
    }

    /// Number of retained timestamps for `key`, if it is tracked.
    pub fn log_len(&self, key: &str) -> Option<usize> {
        self.shared.store.get(key).map(|log| log.len())
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.shared.store.len()
    }

    /// Run one reclaim pass now. Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        reaper::sweep(&self.shared)
    }

    /// Start the periodic reclaim task on the current tokio runtime.
    ///
    /// Calling this while the task is running does nothing.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.reaper.lock();
        if slot.is_some() {
            return Ok(());
        }

        *slot = Some(Reaper::spawn(self.shared.clone(), self.reap_interval)?);
        info!(
            max_requests = self.shared.config.max_requests,
            window_ms = self.shared.config.window_ms,
            interval_ms = self.reap_interval.as_millis() as u64,
            "Reclaim scheduler started"
        );
        Ok(())
    }

    /// Stop the reclaim task and drop all tracked state.
    ///
    /// Safe to call any number of times. Once it returns no further sweep
    /// will run.
    pub fn stop(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.shutdown();
            info!("Reclaim scheduler stopped");
        }
        self.shared.store.clear();
    }

    /// Whether the reclaim task is running.
    pub fn is_running(&self) -> bool {
        self.reaper.lock().is_some()
    }

    fn with_log<R>(&self, key: &str, f: impl FnOnce(&mut RequestLog) -> R) -> R {
        if let Some(mut log) = self.shared.store.get_mut(key) {
            return f(&mut log);
        }

        let mut log = self
            .shared
            .store
            .entry(key.to_owned())
            .or_insert_with(|| {
                debug!(key = %key, "Tracking new client");
                RequestLog::new()
            });
        f(&mut log)
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.shared.config)
            .field("tracked_keys", &self.shared.store.len())
            .field("reap_interval", &self.reap_interval)
            .field("custom_key_extractor", &self.key_extractor.is_some())
            .finish()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    config: LimitConfig,
    clock: Arc<dyn Clock>,
    key_extractor: Option<Arc<dyn KeyExtractor>>,
    reap_interval: Duration,
}

impl RateLimiterBuilder {
    fn new(config: LimitConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            key_extractor: None,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }

    /// Use a different time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default fingerprint with a custom extractor.
    pub fn key_extractor<K: KeyExtractor + 'static>(mut self, extractor: K) -> Self {
        self.key_extractor = Some(Arc::new(extractor));
        self
    }

    /// Set the period between reclaim sweeps.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Validate the configuration and build the limiter.
    pub fn build(self) -> Result<RateLimiter> {
        self.config.validate()?;
        if self.reap_interval.is_zero() {
            return Err(TollgateError::InvalidLimit(
                "reap interval must be greater than zero".to_string(),
            ));
        }

        Ok(self.assemble())
    }

    /// Build without validation, for limits known to be valid.
    pub(crate) fn assemble(self) -> RateLimiter {
        RateLimiter {
            shared: Arc::new(Shared {
                config: self.config,
                store: DashMap::new(),
                clock: self.clock,
            }),
            key_extractor: self.key_extractor,
            reap_interval: self.reap_interval,
            reaper: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyError;
    use crate::ratelimit::clock::ManualClock;
    use axum::body::Body;
    use axum::http::Request;

    fn limiter_at(max_requests: u32, window_ms: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::builder(LimitConfig::new(max_requests, window_ms))
            .clock(clock.clone())
            .build()
            .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_limiter_creation_is_inert() {
        let (limiter, _) = limiter_at(5, 1_000);
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(!limiter.is_running());
        assert_eq!(limiter.reap_interval(), DEFAULT_REAP_INTERVAL);
    }

    #[test]
    fn test_invalid_limits_rejected() {
        assert!(matches!(
            RateLimiter::new(LimitConfig::new(0, 1_000)),
            Err(TollgateError::InvalidLimit(_))
        ));
        assert!(matches!(
            RateLimiter::new(LimitConfig::new(5, 0)),
            Err(TollgateError::InvalidLimit(_))
        ));
        assert!(matches!(
            RateLimiter::builder(LimitConfig::new(5, 1_000))
                .reap_interval(Duration::ZERO)
                .build(),
            Err(TollgateError::InvalidLimit(_))
        ));
    }

    #[test]
    fn test_n_requests_admitted_then_denied() {
        let (limiter, clock) = limiter_at(5, 60_000);

        for i in 0..5 {
            clock.advance(10);
            assert!(limiter.try_acquire("client"), "request {} should pass", i + 1);
        }

        clock.advance(10);
        assert!(!limiter.try_acquire("client"));
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter_at(2, 1_000);

        clock.set(0);
        assert!(limiter.try_acquire("client"));
        clock.set(100);
        assert!(limiter.try_acquire("client"));
        clock.set(200);
        assert!(!limiter.try_acquire("client"));

        // t=0 has left the window; t=100 is still inside it
        clock.set(1_099);
        assert!(limiter.is_admitted("client"));
        assert_eq!(limiter.log_len("client"), Some(1));
    }

    #[test]
    fn test_window_slides_past_both_entries() {
        let (limiter, clock) = limiter_at(2, 1_000);

        clock.set(0);
        assert!(limiter.try_acquire("client"));
        clock.set(100);
        assert!(limiter.try_acquire("client"));
        clock.set(200);
        assert!(!limiter.try_acquire("client"));

        // At t=1100 the entry at t=100 sits exactly on the edge and has expired
        clock.set(1_100);
        assert!(limiter.try_acquire("client"));
        assert_eq!(limiter.log_len("client"), Some(1));
    }

    #[test]
    fn test_timestamp_on_window_edge_is_excluded() {
        let (limiter, clock) = limiter_at(1, 1_000);

        clock.set(0);
        assert!(limiter.try_acquire("client"));
        clock.set(999);
        assert!(!limiter.try_acquire("client"));
        clock.set(1_000);
        assert!(limiter.try_acquire("client"));
    }

    #[test]
    fn test_keys_are_isolated() {
        let (limiter, _) = limiter_at(2, 60_000);

        assert!(limiter.try_acquire("alice"));
        assert!(limiter.try_acquire("alice"));
        assert!(!limiter.try_acquire("alice"));

        assert!(limiter.try_acquire("bob"));
        assert!(limiter.try_acquire("bob"));
        assert_eq!(limiter.log_len("alice"), Some(2));
        assert_eq!(limiter.log_len("bob"), Some(2));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_denied_requests_do_not_grow_log() {
        let (limiter, clock) = limiter_at(3, 60_000);

        for _ in 0..3 {
            assert!(limiter.try_acquire("client"));
        }
        for _ in 0..20 {
            clock.advance(5);
            assert!(!limiter.try_acquire("client"));
        }
        assert_eq!(limiter.log_len("client"), Some(3));
    }

    #[test]
    fn test_record_skipped_while_blocked() {
        let (limiter, clock) = limiter_at(1, 1_000);

        assert!(limiter.is_admitted("client"));
        limiter.record("client");
        assert_eq!(limiter.log_len("client"), Some(1));

        clock.advance(100);
        assert!(!limiter.is_admitted("client"));
        limiter.record("client");
        limiter.record("client");
        assert_eq!(limiter.log_len("client"), Some(1));

        // The block lifts with the window, not with the last attempt
        clock.set(1_000);
        assert!(limiter.is_admitted("client"));
        limiter.record("client");
        assert_eq!(limiter.log_len("client"), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_burst_admits_exactly_limit() {
        let (limiter, _) = limiter_at(5, 60_000);
        let limiter = Arc::new(limiter);
        let barrier = Arc::new(tokio::sync::Barrier::new(50));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    limiter.try_acquire("burst")
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(limiter.log_len("burst"), Some(5));
    }

    #[test]
    fn test_concurrent_threads_admit_exactly_limit() {
        let (limiter, _) = limiter_at(5, 60_000);
        let limiter = Arc::new(limiter);
        let barrier = Arc::new(std::sync::Barrier::new(50));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    limiter.try_acquire("burst")
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_sweep_reclaims_idle_keys() {
        let (limiter, clock) = limiter_at(5, 1_000);

        clock.set(0);
        limiter.try_acquire("idle");
        clock.set(1_500);
        limiter.try_acquire("active");

        // Cutoff is now - 2 * window = 500
        clock.set(2_500);
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.log_len("idle"), None);
        assert_eq!(limiter.log_len("active"), Some(1));
    }

    #[test]
    fn test_stop_clears_state_and_is_idempotent() {
        let (limiter, _) = limiter_at(5, 1_000);
        limiter.try_acquire("a");
        limiter.try_acquire("b");

        limiter.stop();
        assert_eq!(limiter.tracked_keys(), 0);
        limiter.stop();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    fn tenant_key(req: &RequestInfo<'_>) -> std::result::Result<String, KeyError> {
        req.header("x-tenant")
            .map(|t| format!("tenant:{}", t))
            .ok_or_else(|| KeyError::Missing("x-tenant".to_string()))
    }

    #[test]
    fn test_fingerprint_uses_custom_extractor() {
        let limiter = RateLimiter::builder(LimitConfig::new(5, 1_000))
            .key_extractor(tenant_key)
            .build()
            .unwrap();

        let req = Request::builder()
            .header("x-tenant", "acme")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            limiter.fingerprint(&RequestInfo::from_request(&req)),
            "tenant:acme"
        );

        let req = Request::builder()
            .header("x-real-ip", "10.0.0.3")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            limiter.fingerprint(&RequestInfo::from_request(&req)),
            "10.0.0.3:"
        );
    }
}
