// Prometheus metrics for QuotaGuard
//
// Exposes metrics on /metrics HTTP endpoint:
// - Grants, backoffs and admission failures per resource (counters)
// - Queue depth per resource (gauge)
// - Time spent waiting for admission (histogram)
// - Durations of caller operations timed with OperationTimer (histogram)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref GRANTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quotaguard_grants_total", "Total number of admissions granted"),
        &["resource"]
    ).expect("Failed to create grants metric");

    pub static ref BACKOFFS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quotaguard_backoffs_total", "Total number of backoff waits applied"),
        &["resource"]
    ).expect("Failed to create backoffs metric");

    pub static ref ADMISSION_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quotaguard_admission_failures_total", "Total number of failed admissions"),
        &["resource", "reason"]
    ).expect("Failed to create admission failures metric");

    pub static ref QUEUE_DEPTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("quotaguard_queue_depth", "Number of requests waiting for admission"),
        &["resource"]
    ).expect("Failed to create queue depth metric");

    pub static ref ACQUIRE_WAIT_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("quotaguard_acquire_wait_seconds", "Time from enqueue to grant in seconds")
            .buckets(vec![0.001, 0.01, 0.1, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
        &["resource"]
    ).expect("Failed to create acquire wait metric");

    // Operation metrics
    pub static ref OPERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("quotaguard_operation_duration_seconds", "Duration of timed operations in seconds"),
        &["operation", "status"]
    ).expect("Failed to create operation duration metric");

    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quotaguard_operations_total", "Total number of timed operations"),
        &["operation", "status"]
    ).expect("Failed to create operations total metric");
}

/// Register all metrics. Safe to call more than once.
pub fn init() -> prometheus::Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(GRANTS_TOTAL.clone()),
        Box::new(BACKOFFS_TOTAL.clone()),
        Box::new(ADMISSION_FAILURES_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(ACQUIRE_WAIT_SECONDS.clone()),
        Box::new(OPERATION_DURATION_SECONDS.clone()),
        Box::new(OPERATIONS_TOTAL.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

/// Scoped timer around a caller operation, e.g. the API call made after a
/// successful `acquire`.
///
/// Finish it with [`succeed`](Self::succeed) or [`fail`](Self::fail). A timer
/// dropped without finishing is recorded as `cancelled`.
///
/// ```no_run
/// use quotaguard::metrics::OperationTimer;
///
/// # async fn call_api() -> anyhow::Result<()> { Ok(()) }
/// # async fn run() -> anyhow::Result<()> {
/// let timer = OperationTimer::start("api_openai");
/// match call_api().await {
///     Ok(()) => timer.succeed(),
///     Err(e) => {
///         timer.fail(&e);
///         return Err(e);
///     }
/// };
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OperationTimer {
    operation: String,
    started: Instant,
    finished: bool,
}

impl OperationTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Time since the timer started
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Record a successful completion and return the elapsed time
    pub fn succeed(mut self) -> std::time::Duration {
        let elapsed = self.record("success");
        info!(
            operation = %self.operation,
            duration_secs = elapsed.as_secs_f64(),
            "Operation completed"
        );
        elapsed
    }

    /// Record a failed completion and return the elapsed time
    pub fn fail(mut self, err: &dyn std::fmt::Display) -> std::time::Duration {
        let elapsed = self.record("error");
        error!(
            operation = %self.operation,
            duration_secs = elapsed.as_secs_f64(),
            error = %err,
            "Operation failed"
        );
        elapsed
    }

    fn record(&mut self, status: &str) -> std::time::Duration {
        self.finished = true;
        let elapsed = self.started.elapsed();
        OPERATION_DURATION_SECONDS
            .with_label_values(&[self.operation.as_str(), status])
            .observe(elapsed.as_secs_f64());
        OPERATIONS_TOTAL
            .with_label_values(&[self.operation.as_str(), status])
            .inc();
        elapsed
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.record("cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operation_count(operation: &str, status: &str) -> u64 {
        OPERATIONS_TOTAL
            .with_label_values(&[operation, status])
            .get()
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_gather_contains_grants() {
        init().unwrap();
        GRANTS_TOTAL.with_label_values(&["metrics-test"]).inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("quotaguard_grants_total"));
    }

    #[test]
    fn test_timer_success() {
        let timer = OperationTimer::start("timer_success_test");
        assert_eq!(timer.operation(), "timer_success_test");
        timer.succeed();
        assert_eq!(operation_count("timer_success_test", "success"), 1);
    }

    #[test]
    fn test_timer_failure() {
        let timer = OperationTimer::start("timer_failure_test");
        timer.fail(&"boom");
        assert_eq!(operation_count("timer_failure_test", "error"), 1);
        assert_eq!(operation_count("timer_failure_test", "success"), 0);
    }

    #[test]
    fn test_timer_dropped_is_cancelled() {
        {
            let _timer = OperationTimer::start("timer_drop_test");
        }
        assert_eq!(operation_count("timer_drop_test", "cancelled"), 1);
    }
}
