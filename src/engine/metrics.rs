//! Metrics collection for task execution
//!
//! Provides Prometheus-compatible metrics for monitoring host fan-out,
//! per-host latency and task outcomes.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder,
    HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Counter for finished tasks
    static ref TASKS_FINISHED: IntCounterVec = register_int_counter_vec!(
        "fleet_exec_tasks_total",
        "Total number of tasks that reached a terminal status",
        &["strategy", "status"]
    ).unwrap();

    /// Counter for host executions
    static ref HOST_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "fleet_exec_host_executions_total",
        "Total number of host executions by outcome",
        &["status"]
    ).unwrap();

    /// Histogram for host command duration
    static ref HOST_DURATION: HistogramVec = register_histogram_vec!(
        "fleet_exec_host_duration_seconds",
        "Remote command duration per host in seconds",
        &["status"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    /// Gauge for in-flight host executions
    static ref ACTIVE_HOSTS: IntGauge = register_int_gauge!(
        "fleet_exec_active_host_executions",
        "Number of host executions currently running"
    ).unwrap();
}

/// Metrics recorder; a disabled one is a no-op
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    enabled: bool,
}

impl MetricsCollector {
    /// Create a collector; a disabled one records nothing
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Record a host execution starting
    pub fn record_host_start(&self) {
        if self.enabled {
            ACTIVE_HOSTS.inc();
        }
    }

    /// Record a host execution ending
    pub fn record_host_end(&self, status: &str, duration_secs: f64) {
        if !self.enabled {
            return;
        }
        ACTIVE_HOSTS.dec();
        HOST_EXECUTIONS.with_label_values(&[status]).inc();
        HOST_DURATION.with_label_values(&[status]).observe(duration_secs);
    }

    /// Record a host execution whose result was not persisted
    pub fn record_host_discarded(&self) {
        if self.enabled {
            ACTIVE_HOSTS.dec();
        }
    }

    /// Record a host that never reached the remote client
    pub fn record_host_skipped(&self, status: &str) {
        if self.enabled {
            HOST_EXECUTIONS.with_label_values(&[status]).inc();
        }
    }

    /// Record a task reaching a terminal status
    pub fn record_task_finished(&self, strategy: &str, status: &str) {
        if self.enabled {
            TASKS_FINISHED.with_label_values(&[strategy, status]).inc();
        }
    }
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
