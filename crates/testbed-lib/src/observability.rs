//! Observability infrastructure for the testbed
//!
//! Provides:
//! - Prometheus metrics (sample/control latency, control outcomes, error counts)
//! - Structured logging of experiment lifecycle events with tracing

use crate::models::{AppMetric, ControlCounters, ExperimentId, ResourceShares, VmId};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for sample/control latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<TestbedMetricsInner> = OnceLock::new();

struct TestbedMetricsInner {
    sample_latency_seconds: Histogram,
    control_latency_seconds: Histogram,
    control_outcomes: IntCounterVec,
    sensor_errors: IntCounter,
    task_errors: IntCounterVec,
    running_experiments: IntGauge,
}

impl TestbedMetricsInner {
    fn new() -> Self {
        Self {
            sample_latency_seconds: register_histogram!(
                "testbed_sample_latency_seconds",
                "Time spent in one sampling cycle, lock wait excluded",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            control_latency_seconds: register_histogram!(
                "testbed_control_latency_seconds",
                "Time spent in one control cycle, lock wait excluded",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register control_latency_seconds"),

            control_outcomes: register_int_counter_vec!(
                "testbed_control_outcomes_total",
                "Control cycles by outcome",
                &["outcome"]
            )
            .expect("Failed to register control_outcomes"),

            sensor_errors: register_int_counter!(
                "testbed_sensor_errors_total",
                "Observations an estimator refused to collect"
            )
            .expect("Failed to register sensor_errors"),

            task_errors: register_int_counter_vec!(
                "testbed_task_errors_total",
                "Periodic cycles that ended with an error",
                &["task"]
            )
            .expect("Failed to register task_errors"),

            running_experiments: register_int_gauge!(
                "testbed_running_experiments",
                "Application experiments currently running"
            )
            .expect("Failed to register running_experiments"),
        }
    }
}

/// Handle to the process-wide testbed metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct TestbedMetrics {
    _private: (),
}

impl Default for TestbedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TestbedMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TestbedMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TestbedMetricsInner {
        GLOBAL_METRICS.get_or_init(TestbedMetricsInner::new)
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn observe_control_latency(&self, duration_secs: f64) {
        self.inner().control_latency_seconds.observe(duration_secs);
    }

    /// Count one control cycle under `outcome` ("applied", "skipped" or "failed")
    pub fn inc_control_outcome(&self, outcome: &str) {
        self.inner()
            .control_outcomes
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn control_outcome_count(&self, outcome: &str) -> u64 {
        self.inner()
            .control_outcomes
            .with_label_values(&[outcome])
            .get()
    }

    pub fn inc_sensor_errors(&self) {
        self.inner().sensor_errors.inc();
    }

    /// Count a failed periodic cycle of `task` ("sampler" or "controller")
    pub fn inc_task_errors(&self, task: &str) {
        self.inner().task_errors.with_label_values(&[task]).inc();
    }

    pub fn experiment_started(&self) {
        self.inner().running_experiments.inc();
    }

    pub fn experiment_finished(&self) {
        self.inner().running_experiments.dec();
    }
}

/// Structured logger for experiment lifecycle events
///
/// Every event carries the `experiment` name so log lines of concurrent
/// experiments can be told apart.
#[derive(Debug, Clone)]
pub struct ExperimentLogger {
    experiment: String,
}

impl ExperimentLogger {
    pub fn new(experiment: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
        }
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn log_started(&self, id: ExperimentId, app_id: &str, restore_state: bool) {
        info!(
            event = "experiment_started",
            experiment = %self.experiment,
            experiment_id = id,
            app_id = %app_id,
            restore_state = restore_state,
            "Application experiment started"
        );
    }

    pub fn log_stopped(&self, id: ExperimentId, counters: &ControlCounters) {
        info!(
            event = "experiment_stopped",
            experiment = %self.experiment,
            experiment_id = id,
            control_count = counters.control_count,
            control_skip_count = counters.control_skip_count,
            control_fail_count = counters.control_fail_count,
            "Application experiment stopped"
        );
    }

    pub fn log_control_skipped(&self, metric: AppMetric, counters: &ControlCounters) {
        warn!(
            event = "control_skipped",
            experiment = %self.experiment,
            metric = %metric,
            control_count = counters.control_count,
            control_skip_count = counters.control_skip_count,
            "No observation collected during the last control interval, skipping control"
        );
    }

    pub fn log_control_failed(&self, strategy: &str, reason: &str, counters: &ControlCounters) {
        warn!(
            event = "control_failed",
            experiment = %self.experiment,
            strategy = %strategy,
            reason = %reason,
            control_count = counters.control_count,
            control_fail_count = counters.control_fail_count,
            "Control strategy produced no valid decision, keeping current shares"
        );
    }

    pub fn log_vm_state_restored(&self, vm_id: &VmId, shares: &ResourceShares) {
        info!(
            event = "vm_state_restored",
            experiment = %self.experiment,
            vm_id = %vm_id,
            cpu_share = shares.cpu_share,
            memory_share = shares.memory_share,
            "VM resource shares restored"
        );
    }

    pub fn log_cleanup_failed(&self, step: &str, error: &dyn std::fmt::Display) {
        warn!(
            event = "cleanup_failed",
            experiment = %self.experiment,
            step = %step,
            error = %error,
            "Cleanup step failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_testbed_metrics_creation() {
        // Metrics live in the global registry; handles are cheap and shared
        let metrics = TestbedMetrics::new();
        let other = metrics.clone();

        metrics.observe_sample_latency(0.001);
        metrics.observe_control_latency(0.002);
        metrics.inc_sensor_errors();
        metrics.inc_task_errors("sampler");

        let before = other.control_outcome_count("applied");
        metrics.inc_control_outcome("applied");
        assert!(other.control_outcome_count("applied") > before);
    }

    #[test]
    fn test_experiment_logger_creation() {
        let logger = ExperimentLogger::new("app-experiment-7");
        assert_eq!(logger.experiment(), "app-experiment-7");
    }
}
