// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the synchronization engine.
//
// The engine records through the `metrics` facade; without an installed
// recorder (library use, tests) every call is a no-op. The dashboard binary
// installs the Prometheus recorder via setup_metrics().
//
// METRIC TYPES USED:
// - Counter: backend calls, retries, poll runs, part request submissions
// - Gauge: work orders tracked, open part requests
// - Histogram: backend call latency
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES (Constants)
// =============================================================================

/// Backend call counter
/// Labels: method, path (ids collapsed to `:id`), status (0 = no response)
pub const BACKEND_REQUESTS_TOTAL: &str = "backend_requests_total";

/// Backend call latency histogram
/// Labels: method, path
pub const BACKEND_REQUEST_DURATION_SECONDS: &str = "backend_request_duration_seconds";

/// Retries issued by the retry wrapper
/// Labels: path
pub const BACKEND_RETRIES_TOTAL: &str = "backend_retries_total";

/// Polling scheduler runs
/// Labels: target, outcome (ok/error/skipped)
pub const POLL_RUNS_TOTAL: &str = "poll_runs_total";

/// Work orders in the canonical list
pub const WORK_ORDERS_TRACKED: &str = "work_orders_tracked";

/// Part requests not yet acknowledged (including optimistic ones)
pub const OPEN_PART_REQUESTS: &str = "open_part_requests";

/// Part request submissions
/// Labels: outcome (accepted/rejected/invalid)
pub const PART_REQUEST_SUBMISSIONS_TOTAL: &str = "part_request_submissions_total";

// =============================================================================
// SETUP FUNCTION
// =============================================================================
/// Install the Prometheus recorder globally and return its render handle.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    // Backend calls: 10ms .. 30s (slow backends and retried calls)
    let latency_buckets = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(BACKEND_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(BACKEND_REQUESTS_TOTAL, "Total number of calls made to the backend");
    describe_histogram!(BACKEND_REQUEST_DURATION_SECONDS, "Backend call latency in seconds");
    describe_counter!(BACKEND_RETRIES_TOTAL, "Retries after transient backend failures");
    describe_counter!(POLL_RUNS_TOTAL, "Polling scheduler runs by target and outcome");
    describe_gauge!(WORK_ORDERS_TRACKED, "Work orders in the last successful refresh");
    describe_gauge!(OPEN_PART_REQUESTS, "Part requests not yet acknowledged");
    describe_counter!(PART_REQUEST_SUBMISSIONS_TOTAL, "Part request submissions by outcome");

    Ok(handle)
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Collapse work order ids in a backend path so labels stay low-cardinality.
///
/// `/workorders/WO0000042` becomes `/workorders/:id`.
pub fn route_label(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let is_id = segment.len() > 2
                && segment.starts_with("WO")
                && segment[2..].bytes().all(|b| b.is_ascii_digit());
            if is_id {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Record a backend call (status 0 when no response arrived)
pub fn record_backend_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let route = route_label(path);

    counter!(
        BACKEND_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        BACKEND_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => route
    )
    .record(duration_secs);
}

/// Record one retry of a backend call
pub fn record_retry(path: &str) {
    counter!(BACKEND_RETRIES_TOTAL, "path" => route_label(path)).increment(1);
}

/// Record a polling run
pub fn record_poll(target: &str, outcome: &'static str) {
    counter!(
        POLL_RUNS_TOTAL,
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_work_orders_tracked(count: usize) {
    gauge!(WORK_ORDERS_TRACKED).set(count as f64);
}

pub fn set_open_part_requests(count: usize) {
    gauge!(OPEN_PART_REQUESTS).set(count as f64);
}

/// Record a part request submission (accepted/rejected/invalid)
pub fn record_part_request_submission(outcome: &'static str) {
    counter!(PART_REQUEST_SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}
