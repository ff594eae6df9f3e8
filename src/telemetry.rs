//! Best-effort per-call telemetry.
//!
//! Every outbound Overpass call produces one [`QueryRecord`]. Sinks are
//! fire-and-forget: a failing sink must swallow its own error, the
//! discovery run never stops for telemetry.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// One record per outbound spatial query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRecord {
    pub endpoint: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    /// Size of the query text in bytes
    pub query_bytes: usize,
    /// HTTP status, absent when the request never got a response
    pub status: Option<u16>,
    pub result_count: usize,
    pub normalized_count: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Retry-After hint from a 429, when the endpoint sent one
    pub retry_after_secs: Option<u64>,
}

/// Destination for query records. Best-effort by contract.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, record: QueryRecord);
}

/// Default sink: structured debug events on the `telemetry` target.
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn record(&self, record: QueryRecord) {
        debug!(
            target: "telemetry",
            endpoint = %record.endpoint,
            lat = record.lat,
            lng = record.lng,
            radius_m = record.radius_m,
            query_bytes = record.query_bytes,
            status = record.status,
            result_count = record.result_count,
            normalized_count = record.normalized_count,
            duration_ms = record.duration_ms,
            error = record.error.as_deref(),
            retry_after_secs = record.retry_after_secs,
            "query"
        );
    }
}

/// Sink that drops everything, for tests and telemetry-less runs.
pub struct NoopTelemetry;

#[async_trait]
impl TelemetrySink for NoopTelemetry {
    async fn record(&self, _record: QueryRecord) {}
}
