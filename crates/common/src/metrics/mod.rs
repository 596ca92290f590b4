//! Metrics and observability utilities
//!
//! Prometheus metrics through the `metrics` facade with
//! standardized `nexora_` naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all NexoraOS metrics
pub const METRICS_PREFIX: &str = "nexora";

/// Histogram buckets for HTTP request latency (in seconds).
/// Generation routes block on the LLM, so the tail is long.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.025, // 25ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    5.000, // 5s
    15.00, // 15s
    30.00, // 30s
    60.00, // 60s
    120.0, // 2m
];

/// Buckets for a single LLM attempt
pub const LLM_BUCKETS: &[f64] = &[
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    20.00, // 20s
    40.00, // 40s
    80.00, // 80s
    120.0, // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // LLM metrics
    describe_counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total LLM completion attempts"
    );

    describe_counter!(
        format!("{}_llm_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total failed LLM completion attempts"
    );

    describe_histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "LLM completion latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_stage_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline stage executions by stage and outcome"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    describe_counter!(
        format!("{}_chapters_generated_total", METRICS_PREFIX),
        Unit::Count,
        "Chapters written to a job"
    );

    describe_counter!(
        format!("{}_parse_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Structured LLM outputs replaced by a placeholder"
    );

    // Billing metrics
    describe_counter!(
        format!("{}_webhook_events_total", METRICS_PREFIX),
        Unit::Count,
        "Payment webhook events by type and outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record one LLM attempt
pub fn record_llm_call(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_llm_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_llm_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a pipeline stage run
pub fn record_stage(stage: &'static str, duration_secs: f64, success: bool) {
    let outcome = if success { "success" } else { "error" };

    counter!(
        format!("{}_stage_runs_total", METRICS_PREFIX),
        "stage" => stage,
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage
    )
    .record(duration_secs);
}

pub fn record_chapter_generated() {
    counter!(format!("{}_chapters_generated_total", METRICS_PREFIX)).increment(1);
}

pub fn record_parse_fallback(what: &'static str) {
    counter!(
        format!("{}_parse_fallbacks_total", METRICS_PREFIX),
        "output" => what
    )
    .increment(1);
}

/// Helper to record a payment webhook delivery
pub fn record_webhook(event_type: &str, accepted: bool) {
    counter!(
        format!("{}_webhook_events_total", METRICS_PREFIX),
        "event" => event_type.to_string(),
        "accepted" => accepted.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted() {
        for buckets in [LATENCY_BUCKETS, LLM_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls are no-ops
        RequestMetrics::start("POST", "/generate-chapter").finish(200);
        record_llm_call(0.5, "gpt-4o-mini", false);
        record_stage("outline", 1.0, true);
        record_chapter_generated();
        record_webhook("payment.succeeded", true);
    }
}
