//! Telemetry - metrics recording for scan orchestration
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed (see [`install_prometheus`]).

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

pub mod names {
    pub const SCANS_STARTED: &str = "aegis_scans_started_total";
    pub const SCAN_START_FAILURES: &str = "aegis_scan_start_failures_total";
    pub const BACKEND_FAILURES: &str = "aegis_backend_failures_total";
    pub const BACKEND_CALL_SECONDS: &str = "aegis_backend_call_seconds";
    pub const SCAN_FANOUT_WIDTH: &str = "aegis_scan_fanout_width";
    pub const AGGREGATIONS: &str = "aegis_result_aggregations_total";
    pub const SCAN_FINDINGS: &str = "aegis_scan_findings";
    pub const SCHEDULE_FIRINGS: &str = "aegis_schedule_firings_total";
    pub const SCHEDULE_FIRING_FAILURES: &str = "aegis_schedule_firing_failures_total";
    pub const SCHEDULES_ARMED: &str = "aegis_schedules_armed";
}

/// Backend operation a measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
    Start,
    Status,
    Results,
}

impl BackendOp {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BackendOp::Start => "start",
            BackendOp::Status => "status",
            BackendOp::Results => "results",
        }
    }
}

pub fn record_scan_started(backends: usize) {
    counter!(names::SCANS_STARTED).increment(1);
    histogram!(names::SCAN_FANOUT_WIDTH).record(backends as f64);
}

pub fn record_scan_start_failed() {
    counter!(names::SCAN_START_FAILURES).increment(1);
}

pub fn record_backend_failure(backend: &str, op: BackendOp) {
    counter!(
        names::BACKEND_FAILURES,
        "backend" => backend.to_string(),
        "op" => op.as_str()
    )
    .increment(1);
}

pub fn record_backend_call(backend: &str, op: BackendOp, elapsed: Duration) {
    histogram!(
        names::BACKEND_CALL_SECONDS,
        "backend" => backend.to_string(),
        "op" => op.as_str()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_aggregation(findings: usize) {
    counter!(names::AGGREGATIONS).increment(1);
    histogram!(names::SCAN_FINDINGS).record(findings as f64);
}

pub fn record_schedule_fired(ok: bool) {
    counter!(names::SCHEDULE_FIRINGS).increment(1);
    if !ok {
        counter!(names::SCHEDULE_FIRING_FAILURES).increment(1);
    }
}

pub fn record_schedules_armed(count: usize) {
    gauge!(names::SCHEDULES_ARMED).set(count as f64);
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to install Prometheus exporter on {addr}"))?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}
