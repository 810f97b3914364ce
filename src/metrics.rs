//! Metrics support for the server

use iroh_metrics::{Counter, MetricsGroup};

/// Metrics for the delta service
#[derive(Debug, Default, MetricsGroup)]
#[metrics(name = "catalog_delta")]
pub struct Metrics {
    /// Number of delta requests received.
    pub delta_requests: Counter,
    /// Delta requests rejected because of their HTTP method.
    pub delta_rejected_method: Counter,
    /// Delta requests rejected because they came from this very process.
    pub delta_rejected_self: Counter,
    /// Delta requests for catalogs the oracle does not know.
    pub delta_unknown_catalog: Counter,
    /// Delta requests whose body was not received within the request timeout.
    pub delta_body_timeout: Counter,
    /// Delta requests answered with an archive.
    pub delta_served: Counter,
    /// Parts approved over all served deltas.
    pub delta_parts_approved: Counter,
    /// Archive streams aborted after the response was committed.
    pub delta_stream_failed: Counter,
    /// Number of HTTP requests
    pub http_requests: Counter,
    /// Number of HTTP requests with a 2xx status code
    pub http_requests_success: Counter,
    /// Number of HTTP requests with a non-2xx status code
    pub http_requests_error: Counter,
    /// Total duration of all HTTP requests
    pub http_requests_duration_ms: Counter,
}
