//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BATCH_DURATION, MAILS_FAILED_TOTAL, MAILS_SENT_TOTAL, PARSE_FAILURES_TOTAL, ROWS_PARSED_TOTAL,
    ROWS_SKIPPED_TOTAL, SENDS_IN_FLIGHT, SEND_LATENCY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording parse metrics
pub struct ParseMetrics;

impl ParseMetrics {
    pub fn record_rows(count: usize) {
        ROWS_PARSED_TOTAL.inc_by(count as u64);
    }

    pub fn record_failure(kind: &str) {
        PARSE_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for recording dispatch metrics
pub struct MailMetrics;

impl MailMetrics {
    pub fn record_sent(latency: Duration) {
        MAILS_SENT_TOTAL.inc();
        SEND_LATENCY.observe(latency.as_secs_f64());
    }

    pub fn record_render_failed() {
        MAILS_FAILED_TOTAL.with_label_values(&["render"]).inc();
    }

    pub fn record_transport_failed(latency: Duration) {
        MAILS_FAILED_TOTAL.with_label_values(&["transport"]).inc();
        SEND_LATENCY.observe(latency.as_secs_f64());
    }

    pub fn record_skipped(count: usize) {
        ROWS_SKIPPED_TOTAL.inc_by(count as u64);
    }

    pub fn send_started() {
        SENDS_IN_FLIGHT.inc();
    }

    pub fn send_finished() {
        SENDS_IN_FLIGHT.dec();
    }

    pub fn record_batch(duration: Duration) {
        BATCH_DURATION.observe(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_metrics() {
        MailMetrics::record_sent(Duration::from_millis(5));
        ParseMetrics::record_rows(3);

        let encoded = encode_metrics().unwrap();
        assert!(encoded.contains("mailmerger_mails_sent_total"));
        assert!(encoded.contains("mailmerger_rows_parsed_total"));
    }
}
