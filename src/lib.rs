//! Tollgate - In-Process Rate Limiting Middleware
//!
//! This crate implements per-client admission control for HTTP services. Each
//! client key keeps an exact log of its recent requests in a sliding window;
//! requests beyond the configured limit are answered with a 429 before they
//! reach the protected handler. Idle clients are reclaimed by a background
//! task so memory tracks only recently active callers.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
