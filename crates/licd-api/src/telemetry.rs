//! # License Metrics
//!
//! Domain metrics recorded through the `metrics` facade and exported in
//! Prometheus text format by `metrics-exporter-prometheus`. Without an
//! installed recorder every call here is a no-op.

use std::time::Duration;

use licd_core::ToolName;
use licd_state::{CapacityClass, ToolLicensePool};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const BORROW_DURATION_BUCKETS: &[f64] = &[
    0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Install the global Prometheus recorder and describe every metric.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("license_borrow_duration_seconds".to_string()),
            BORROW_DURATION_BUCKETS,
        )?
        .install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    describe_counter!("license_borrow_attempts_total", "Borrow requests received");
    describe_counter!("license_borrow_success_total", "Borrow requests admitted");
    describe_counter!(
        "license_borrow_failure_total",
        "Borrow requests that failed, by reason"
    );
    describe_histogram!(
        "license_borrow_duration_seconds",
        Unit::Seconds,
        "Time to admit and journal a borrow"
    );
    describe_counter!(
        "license_overage_checkouts_total",
        "Borrows admitted from the overage allowance"
    );
    describe_counter!("license_returns_total", "Leases returned by their holder");
    describe_counter!("license_expired_total", "Leases reclaimed after timeout");
    describe_gauge!("licenses_borrowed", "Active leases per tool");
    describe_gauge!("licenses_total", "Nominal licenses per tool");
    describe_gauge!("licenses_overage", "Active leases beyond total per tool");
    describe_gauge!("licenses_commit", "Commit sub-pool size per tool");
    describe_gauge!("licenses_max_overage", "Overage allowance per tool");
    describe_gauge!(
        "licenses_at_max_overage",
        "1 when a tool's overage allowance is exhausted"
    );
    describe_gauge!("licd_journal_pending", "Journal writes waiting for retry");
    describe_counter!("http_requests_total", "HTTP requests by method, path and status");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency"
    );
}

pub fn borrow_attempt(tool: &str) {
    counter!("license_borrow_attempts_total", "tool" => tool.to_string()).increment(1);
}

pub fn borrow_success(tool: &ToolName, class: CapacityClass, elapsed: Duration) {
    let tool = tool.to_string();
    counter!("license_borrow_success_total", "tool" => tool.clone()).increment(1);
    if class == CapacityClass::Overage {
        counter!("license_overage_checkouts_total", "tool" => tool.clone()).increment(1);
    }
    histogram!("license_borrow_duration_seconds", "tool" => tool).record(elapsed.as_secs_f64());
}

pub fn borrow_failure(tool: &str, reason: &'static str) {
    counter!(
        "license_borrow_failure_total",
        "tool" => tool.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn lease_returned(tool: &ToolName) {
    counter!("license_returns_total", "tool" => tool.to_string()).increment(1);
}

pub fn lease_expired(tool: &ToolName) {
    counter!("license_expired_total", "tool" => tool.to_string()).increment(1);
}

/// Refresh the per-tool gauges from a pool snapshot.
pub fn record_pool(pool: &ToolLicensePool) {
    let tool = pool.tool.to_string();
    gauge!("licenses_borrowed", "tool" => tool.clone()).set(f64::from(pool.borrowed));
    gauge!("licenses_total", "tool" => tool.clone()).set(f64::from(pool.total));
    gauge!("licenses_overage", "tool" => tool.clone()).set(f64::from(pool.overage));
    gauge!("licenses_commit", "tool" => tool.clone()).set(f64::from(pool.commit));
    gauge!("licenses_max_overage", "tool" => tool.clone()).set(f64::from(pool.max_overage));
    gauge!("licenses_at_max_overage", "tool" => tool)
        .set(if pool.at_max_overage() { 1.0 } else { 0.0 });
}

pub fn journal_pending(pending: usize) {
    gauge!("licd_journal_pending").set(pending as f64);
}
