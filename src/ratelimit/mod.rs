//! Rate limiting logic and state management.

mod clock;
mod fingerprint;
mod limiter;
mod log;
mod policy;
mod reaper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::{resolve_key, DefaultKeyExtractor, KeyExtractor, RequestInfo};
pub use limiter::{LimitConfig, RateLimiter, RateLimiterBuilder, DEFAULT_REAP_INTERVAL};
pub use log::RequestLog;
pub use policy::{Policy, PolicySet};
