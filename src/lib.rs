//! QuotaGuard Library
//!
//! Admission control, quota bookkeeping and backoff coordination for
//! outbound calls to several independently rate-limited external APIs.
//!
//! Callers `acquire` a named resource before making a request and `release`
//! it afterwards; the limiter queues, delays or refuses calls so that each
//! resource stays within its per-minute and per-hour quota.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod rate_limit;

pub use rate_limit::{
    Granted, RateLimitConfig, RateLimitError, RateLimiter, ResourceLimit, ResourceStatus,
};
