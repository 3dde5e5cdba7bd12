//! Application counters.
//!
//! Recorded through the `metrics` facade. They show up at `/internal/metrics` next to the HTTP
//! metrics from `axum-prometheus` once its recorder is installed; without a recorder every call
//! is a no-op.

use metrics::counter;

use crate::limits::Bucket;

/// One envelope persisted. `mode` is `single` or `batch`.
pub fn record_ingested(mode: &'static str) {
    counter!("csactl_invocations_ingested_total", "mode" => mode).increment(1);
}

/// One envelope rejected by validation or storage. `reason` is `validation` or `storage`.
pub fn record_ingest_failure(mode: &'static str, reason: &'static str) {
    counter!("csactl_ingest_failures_total", "mode" => mode, "reason" => reason).increment(1);
}

pub fn record_rate_limited(bucket: Bucket) {
    counter!("csactl_rate_limited_total", "bucket" => bucket.as_str()).increment(1);
}
