//! Quota Dashboard Support
//!
//! Aggregates per-resource snapshots into a single report for dashboards and
//! the `/status` endpoint.

use serde::{Deserialize, Serialize};

use super::manager::{RateLimiter, ResourceStatus};

/// Dashboard data for the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    /// Timestamp of data generation
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Totals across all resources
    pub summary: QuotaSummary,

    /// Per-resource snapshots, sorted by name
    pub resources: Vec<ResourceStatus>,

    /// Resources that need attention
    pub warnings: Vec<QuotaWarning>,
}

/// Totals across all resources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaSummary {
    pub total_resources: usize,

    /// Requests waiting across all queues
    pub total_queued: usize,

    /// Grants in the last minute across all resources
    pub total_minute_usage: usize,

    /// Grants in the last hour across all resources
    pub total_hour_usage: usize,

    /// Resources currently backing off
    pub saturated_resources: usize,

    /// Average hourly utilization percentage
    pub avg_utilization_percent: f64,
}

/// Why a resource was flagged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotaWarning {
    /// Hourly usage at or above the warning percentage
    HighUsage {
        resource: String,
        utilization_percent: f64,
    },
    /// Queue depth above the warning threshold
    LargeQueue { resource: String, queue_depth: usize },
    /// Consecutive backoffs since the last grant
    Saturated {
        resource: String,
        consecutive_backoffs: u32,
        max_retry_attempts: u32,
    },
}

impl QuotaWarning {
    pub fn resource(&self) -> &str {
        match self {
            QuotaWarning::HighUsage { resource, .. }
            | QuotaWarning::LargeQueue { resource, .. }
            | QuotaWarning::Saturated { resource, .. } => resource,
        }
    }
}

/// Builds dashboard data from a limiter
pub struct DashboardBuilder {
    limiter: RateLimiter,
}

impl DashboardBuilder {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    pub fn build(&self) -> DashboardData {
        let resources = self.limiter.all_statuses();
        let summary = build_summary(&resources);
        let warnings = collect_warnings(
            &resources,
            self.limiter.usage_warning_percent(),
            self.limiter.queue_warning_threshold(),
        );

        DashboardData {
            timestamp: chrono::Utc::now(),
            summary,
            resources,
            warnings,
        }
    }
}

fn build_summary(resources: &[ResourceStatus]) -> QuotaSummary {
    let total_utilization: f64 = resources.iter().map(|r| r.hour_utilization_percent).sum();
    let avg_utilization_percent = if resources.is_empty() {
        0.0
    } else {
        total_utilization / resources.len() as f64
    };

    QuotaSummary {
        total_resources: resources.len(),
        total_queued: resources.iter().map(|r| r.queue_depth).sum(),
        total_minute_usage: resources.iter().map(|r| r.minute_usage).sum(),
        total_hour_usage: resources.iter().map(|r| r.hour_usage).sum(),
        saturated_resources: resources.iter().filter(|r| r.saturation_count > 0).count(),
        avg_utilization_percent,
    }
}

fn collect_warnings(
    resources: &[ResourceStatus],
    usage_warning_percent: f64,
    queue_warning_threshold: usize,
) -> Vec<QuotaWarning> {
    let mut warnings = Vec::new();

    for status in resources {
        if status.hour_utilization_percent >= usage_warning_percent {
            warnings.push(QuotaWarning::HighUsage {
                resource: status.resource.clone(),
                utilization_percent: status.hour_utilization_percent,
            });
        }
        if status.queue_depth > queue_warning_threshold {
            warnings.push(QuotaWarning::LargeQueue {
                resource: status.resource.clone(),
                queue_depth: status.queue_depth,
            });
        }
        if status.saturation_count > 0 {
            warnings.push(QuotaWarning::Saturated {
                resource: status.resource.clone(),
                consecutive_backoffs: status.saturation_count,
                max_retry_attempts: status.max_retry_attempts,
            });
        }
    }

    warnings
}
