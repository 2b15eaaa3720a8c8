//! HTTP integration: rate limiting middleware, the rejection response and a
//! small server wrapper.

mod middleware;
mod rejection;
mod server;

pub use middleware::{Guarded, RateLimitLayer, RateLimitService};
pub use rejection::{rejection_response, retry_after_secs, REJECTION_MESSAGE};
pub use server::HttpServer;
