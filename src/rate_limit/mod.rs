//! Rate Limiting and Backoff Coordination Module
//!
//! Admission control for outbound calls to independently rate-limited
//! external APIs ("resources"), each with its own per-minute and per-hour
//! quota.
//!
//! # Features
//!
//! - Sliding one-minute and one-hour windows over recorded grants
//! - Strict per-resource FIFO admission
//! - Exponential backoff on saturation with a per-resource attempt ceiling
//! - Status snapshots and a dashboard report for monitoring
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   RateLimiter (facade)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  per resource, behind its own lock:                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │ Request      │  │ Admission    │  │ Backoff          │   │
//! │  │ History      │  │ Queue (FIFO) │  │ Controller       │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │          Quota Registry (static limits)              │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backoff;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod queue;

pub use backoff::{BackoffController, BackoffDecision};
pub use config::{QuotaRegistry, RateLimitConfig, ResourceLimit};
pub use dashboard::{DashboardBuilder, DashboardData, QuotaSummary, QuotaWarning};
pub use error::RateLimitError;
pub use ledger::{RequestHistory, HOUR_WINDOW, MINUTE_WINDOW};
pub use manager::{Granted, RateLimiter, ResourceStatus, DEFAULT_PRIORITY};
pub use queue::{AdmissionQueue, PendingRequest, Ticket};
