//! Rate Limit Manager
//!
//! Public entry point tying the registry, ledger, queue and backoff controller
//! together per resource.
//!
//! Each `acquire` call moves one pending request through
//! `Queued -> Checking -> {Granted | Backoff -> Checking | Failed}`.
//! Every resource has its own lock, so saturation of one resource never delays
//! admission checks for another. Backoff waits happen with the lock released
//! and can be interrupted by [`RateLimiter::shutdown`] or by dropping the call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::backoff::{BackoffController, BackoffDecision};
use super::config::{QuotaRegistry, RateLimitConfig, ResourceLimit};
use super::error::RateLimitError;
use super::ledger::RequestHistory;
use super::queue::{AdmissionQueue, Ticket};
use crate::logging::RequestId;
use crate::metrics;

/// Default priority for callers that do not care
pub const DEFAULT_PRIORITY: u32 = 1;

/// Successful admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granted {
    /// Resource the grant was recorded against
    pub resource: String,

    /// Queue handle the request held while pending
    pub ticket: Ticket,

    /// Time from enqueue to grant
    pub waited: Duration,

    /// Backoff waits this call went through
    pub backoffs: u32,

    /// Minute-window usage including this grant
    pub minute_usage: usize,

    /// Hour-window usage including this grant
    pub hour_usage: usize,
}

/// Read-only snapshot of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub resource: String,

    /// Requests waiting for admission
    pub queue_depth: usize,

    /// Grants in the last minute
    pub minute_usage: usize,

    /// Grants in the last hour
    pub hour_usage: usize,

    /// Consecutive backoffs since the last grant
    pub saturation_count: u32,

    /// Grants not yet acknowledged with `release`
    pub in_flight: u64,

    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub max_retry_attempts: u32,

    /// Hour usage as a percentage of the hourly limit
    pub hour_utilization_percent: f64,
}

/// Mutable state for one resource, guarded by its own lock
#[derive(Debug)]
struct ResourceState {
    history: RequestHistory,
    queue: AdmissionQueue,
    backoff: BackoffController,
    in_flight: u64,
}

#[derive(Debug)]
struct ResourceSlot {
    name: String,
    limit: ResourceLimit,
    state: Mutex<ResourceState>,
    /// Signalled whenever the queue head leaves
    head_changed: Notify,
}

impl ResourceSlot {
    fn new(name: &str, limit: ResourceLimit) -> Self {
        Self {
            name: name.to_string(),
            limit,
            state: Mutex::new(ResourceState {
                history: RequestHistory::new(),
                queue: AdmissionQueue::new(),
                backoff: BackoffController::for_limit(&limit),
                in_flight: 0,
            }),
            head_changed: Notify::new(),
        }
    }

    /// Critical sections never await and leave the state consistent, so a
    /// poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self, now: Instant) -> ResourceStatus {
        let state = self.lock();
        let hour_usage = state.history.hour_usage(now);
        ResourceStatus {
            resource: self.name.clone(),
            queue_depth: state.queue.len(),
            minute_usage: state.history.minute_usage(now),
            hour_usage,
            saturation_count: state.backoff.consecutive_backoffs(),
            in_flight: state.in_flight,
            requests_per_minute: self.limit.requests_per_minute,
            requests_per_hour: self.limit.requests_per_hour,
            max_retry_attempts: self.limit.max_retry_attempts,
            hour_utilization_percent: utilization_percent(hour_usage, self.limit.requests_per_hour),
        }
    }
}

/// Queue membership of one in-flight `acquire` call.
///
/// Dropping an unresolved slot removes the request from the queue, so a call
/// abandoned at any await point never records a grant and never blocks the
/// requests behind it.
struct QueueSlot {
    slot: Arc<ResourceSlot>,
    ticket: Ticket,
    resolved: bool,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let (removed, depth) = {
            let mut state = self.slot.lock();
            let removed = state.queue.remove(self.ticket);
            (removed, state.queue.len())
        };

        if let Some(was_head) = removed {
            metrics::QUEUE_DEPTH
                .with_label_values(&[self.slot.name.as_str()])
                .set(depth as i64);
            if was_head {
                self.slot.head_changed.notify_waiters();
            }
            debug!(
                resource = %self.slot.name,
                ticket = %self.ticket,
                queue_depth = depth,
                "Pending request abandoned"
            );
        }
    }
}

/// Result of one admission check, computed under the resource lock
enum Check {
    Granted {
        minute_usage: usize,
        hour_usage: usize,
        queue_depth: usize,
    },
    Backoff {
        delay: Duration,
        attempt: u32,
        minute_usage: usize,
        hour_usage: usize,
    },
    Failed {
        attempts: u32,
        queue_depth: usize,
    },
}

/// Rate limiter facade
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Quota registry
    registry: Arc<QuotaRegistry>,

    /// Per-resource state, fixed at construction
    resources: Arc<HashMap<String, Arc<ResourceSlot>>>,

    /// Queue depth above which a warning is logged
    queue_warning_threshold: usize,

    /// Hourly utilization percentage at which a warning is logged
    usage_warning_percent: f64,

    /// Set once the limiter is shutting down
    shutdown: Arc<watch::Sender<bool>>,
}

impl RateLimiter {
    /// Create a limiter from configuration
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let registry = config.registry()?;
        Ok(Self::from_registry(
            registry,
            config.queue_warning_threshold,
            config.usage_warning_percent,
        ))
    }

    /// Create with the reference limits
    pub fn default_config() -> Self {
        let config = RateLimitConfig::default();
        Self::from_registry(
            QuotaRegistry::default(),
            config.queue_warning_threshold,
            config.usage_warning_percent,
        )
    }

    fn from_registry(
        registry: QuotaRegistry,
        queue_warning_threshold: usize,
        usage_warning_percent: f64,
    ) -> Self {
        let resources = registry
            .iter()
            .map(|(name, limit)| (name.to_string(), Arc::new(ResourceSlot::new(name, *limit))))
            .collect();
        let (shutdown, _) = watch::channel(false);

        Self {
            registry: Arc::new(registry),
            resources: Arc::new(resources),
            queue_warning_threshold,
            usage_warning_percent,
            shutdown: Arc::new(shutdown),
        }
    }

    fn slot(&self, resource: &str) -> Result<&Arc<ResourceSlot>, RateLimitError> {
        self.resources
            .get(resource)
            .ok_or_else(|| RateLimitError::UnknownResource(resource.to_string()))
    }

    /// Wait for admission to call `resource`.
    ///
    /// Requests for one resource are admitted strictly in arrival order;
    /// `priority` is recorded with the request but does not reorder the queue.
    ///
    /// # Errors
    ///
    /// * `UnknownResource` - the name is not registered
    /// * `RetryLimitExceeded` - the resource stayed saturated through every backoff
    /// * `Shutdown` - the limiter was shut down while waiting
    pub async fn acquire(&self, resource: &str, priority: u32) -> Result<Granted, RateLimitError> {
        let slot = match self.slot(resource) {
            Ok(slot) => Arc::clone(slot),
            Err(e) => {
                error!(resource = %resource, "Rate limiter called with unregistered resource");
                return Err(e);
            }
        };

        let request_id = RequestId::new();
        let span = info_span!("acquire", resource = %resource, request_id = %request_id, priority);
        self.drive(slot, priority).instrument(span).await
    }

    /// Like [`acquire`](Self::acquire) with a hard deadline. On expiry the
    /// request leaves the queue without recording a grant.
    pub async fn acquire_with_timeout(
        &self,
        resource: &str,
        priority: u32,
        timeout: Duration,
    ) -> Result<Granted, RateLimitError> {
        match tokio::time::timeout(timeout, self.acquire(resource, priority)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(resource = %resource, timeout = ?timeout, "Admission timed out");
                metrics::ADMISSION_FAILURES_TOTAL
                    .with_label_values(&[resource, "timeout"])
                    .inc();
                Err(RateLimitError::Timeout {
                    resource: resource.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn drive(&self, slot: Arc<ResourceSlot>, priority: u32) -> Result<Granted, RateLimitError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(self.fail_shutdown(&slot.name));
        }

        let enqueued_at = Instant::now();
        let (ticket, depth) = {
            let mut state = slot.lock();
            let ticket = state.queue.enqueue(priority, enqueued_at);
            (ticket, state.queue.len())
        };
        let mut pending = QueueSlot {
            slot: Arc::clone(&slot),
            ticket,
            resolved: false,
        };
        self.observe_queue_depth(&slot.name, depth);

        let limit = slot.limit;
        let mut backoffs = 0;

        loop {
            // Queued: only the head is checked
            loop {
                let notified = slot.head_changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let is_head = slot.lock().queue.is_head(ticket);
                if is_head {
                    break;
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = shutdown.changed() => return Err(self.fail_shutdown(&slot.name)),
                }
            }

            // Checking
            let check = {
                let mut state = slot.lock();
                let now = Instant::now();
                state.history.prune(now);

                let minute_usage = state.history.minute_usage(now);
                let hour_usage = state.history.hour_usage(now);

                if minute_usage < limit.requests_per_minute as usize
                    && hour_usage < limit.requests_per_hour as usize
                {
                    state.queue.dequeue();
                    state.history.record_grant(now);
                    state.backoff.reset();
                    state.in_flight += 1;
                    pending.resolved = true;
                    Check::Granted {
                        minute_usage: minute_usage + 1,
                        hour_usage: hour_usage + 1,
                        queue_depth: state.queue.len(),
                    }
                } else {
                    match state.backoff.compute_delay() {
                        BackoffDecision::Wait(delay) => Check::Backoff {
                            delay,
                            attempt: state.backoff.consecutive_backoffs(),
                            minute_usage,
                            hour_usage,
                        },
                        BackoffDecision::GiveUp { attempts } => {
                            state.queue.dequeue();
                            pending.resolved = true;
                            Check::Failed {
                                attempts,
                                queue_depth: state.queue.len(),
                            }
                        }
                    }
                }
            };

            match check {
                Check::Granted {
                    minute_usage,
                    hour_usage,
                    queue_depth,
                } => {
                    slot.head_changed.notify_waiters();
                    let waited = enqueued_at.elapsed();
                    self.record_grant(&slot, hour_usage, queue_depth, waited);
                    debug!(
                        ticket = %ticket,
                        minute_usage,
                        hour_usage,
                        waited_ms = waited.as_millis() as u64,
                        "Admission granted"
                    );
                    return Ok(Granted {
                        resource: slot.name.clone(),
                        ticket,
                        waited,
                        backoffs,
                        minute_usage,
                        hour_usage,
                    });
                }
                Check::Failed {
                    attempts,
                    queue_depth,
                } => {
                    slot.head_changed.notify_waiters();
                    self.observe_queue_depth(&slot.name, queue_depth);
                    metrics::ADMISSION_FAILURES_TOTAL
                        .with_label_values(&[slot.name.as_str(), "retry_limit_exceeded"])
                        .inc();
                    error!(
                        ticket = %ticket,
                        attempts,
                        "Max retry attempts reached for {}",
                        slot.name
                    );
                    return Err(RateLimitError::RetryLimitExceeded {
                        resource: slot.name.clone(),
                        attempts,
                    });
                }
                Check::Backoff {
                    delay,
                    attempt,
                    minute_usage,
                    hour_usage,
                } => {
                    backoffs += 1;
                    metrics::BACKOFFS_TOTAL
                        .with_label_values(&[slot.name.as_str()])
                        .inc();
                    warn!(
                        delay_secs = delay.as_secs_f64(),
                        attempt,
                        max_attempts = limit.max_retry_attempts,
                        minute_usage,
                        hour_usage,
                        "{} rate limit backoff: {:?}",
                        slot.name,
                        delay
                    );

                    // Backoff: suspended without holding the resource lock
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return Err(self.fail_shutdown(&slot.name)),
                    }
                }
            }
        }
    }

    fn record_grant(&self, slot: &ResourceSlot, hour_usage: usize, queue_depth: usize, waited: Duration) {
        let name = slot.name.as_str();
        metrics::GRANTS_TOTAL.with_label_values(&[name]).inc();
        metrics::ACQUIRE_WAIT_SECONDS
            .with_label_values(&[name])
            .observe(waited.as_secs_f64());
        metrics::QUEUE_DEPTH
            .with_label_values(&[name])
            .set(queue_depth as i64);

        let percent = utilization_percent(hour_usage, slot.limit.requests_per_hour);
        if percent >= self.usage_warning_percent {
            warn!(
                resource = %name,
                hour_usage,
                hour_limit = slot.limit.requests_per_hour,
                "{} quota usage at {:.1}%",
                name,
                percent
            );
        }
    }

    fn observe_queue_depth(&self, resource: &str, depth: usize) {
        metrics::QUEUE_DEPTH
            .with_label_values(&[resource])
            .set(depth as i64);
        if depth > self.queue_warning_threshold {
            warn!(
                resource = %resource,
                queue_depth = depth,
                threshold = self.queue_warning_threshold,
                "Large queue size for {}: {} requests",
                resource,
                depth
            );
        }
    }

    fn fail_shutdown(&self, resource: &str) -> RateLimitError {
        metrics::ADMISSION_FAILURES_TOTAL
            .with_label_values(&[resource, "shutdown"])
            .inc();
        debug!(resource = %resource, "Admission aborted by shutdown");
        RateLimitError::Shutdown {
            resource: resource.to_string(),
        }
    }

    /// Acknowledge that a granted call finished.
    ///
    /// Capacity is a rolling window, so nothing is returned here; this only
    /// prunes expired history and settles the in-flight count.
    pub fn release(&self, resource: &str) {
        let Ok(slot) = self.slot(resource) else {
            warn!(resource = %resource, "Release called for unregistered resource");
            return;
        };

        let (pruned, in_flight) = {
            let mut state = slot.lock();
            let pruned = state.history.prune(Instant::now());
            state.in_flight = state.in_flight.saturating_sub(1);
            (pruned, state.in_flight)
        };
        debug!(resource = %resource, pruned, in_flight, "Released");
    }

    /// Snapshot of one resource
    pub fn get_status(&self, resource: &str) -> Result<ResourceStatus, RateLimitError> {
        Ok(self.slot(resource)?.status(Instant::now()))
    }

    /// Snapshot of every registered resource, sorted by name
    pub fn all_statuses(&self) -> Vec<ResourceStatus> {
        let now = Instant::now();
        self.registry
            .names()
            .filter_map(|name| self.resources.get(name))
            .map(|slot| slot.status(now))
            .collect()
    }

    /// Abort every pending call and refuse new ones
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Rate limiter shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn registry(&self) -> &QuotaRegistry {
        &self.registry
    }

    pub fn usage_warning_percent(&self) -> f64 {
        self.usage_warning_percent
    }

    pub fn queue_warning_threshold(&self) -> usize {
        self.queue_warning_threshold
    }
}

fn utilization_percent(usage: usize, limit: u32) -> f64 {
    if limit == 0 {
        0.0
    } else {
        usage as f64 * 100.0 / f64::from(limit)
    }
}
