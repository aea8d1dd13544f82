//! Prometheus metrics for the mail merge engine.
//!
//! This module provides:
//! - Parse metrics (rows loaded, parse failures by kind)
//! - Dispatch metrics (mails sent, failed by stage, rows skipped after cancellation)
//! - Latency metrics (per-message transport latency, batch duration)

mod helpers;

pub use helpers::{encode_metrics, MailMetrics, ParseMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "mailmerger";

lazy_static! {
    // ============================================================================
    // Parse Metrics
    // ============================================================================

    /// Data rows loaded from tabular sources
    pub static ref ROWS_PARSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rows_parsed_total", METRIC_PREFIX),
        "Total data rows loaded from tabular sources"
    ).unwrap();

    /// Parse failures by error kind
    pub static ref PARSE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_parse_failures_total", METRIC_PREFIX),
        "Total failed parse attempts",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Mails accepted by the transport
    pub static ref MAILS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_mails_sent_total", METRIC_PREFIX),
        "Total mails accepted by the transport"
    ).unwrap();

    /// Mail failures by stage (render or transport)
    pub static ref MAILS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_mails_failed_total", METRIC_PREFIX),
        "Total mails that failed to render or send",
        &["stage"]
    ).unwrap();

    /// Rows not sent because the batch was cancelled
    pub static ref ROWS_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rows_skipped_total", METRIC_PREFIX),
        "Total rows skipped after cancellation"
    ).unwrap();

    /// Sends currently in progress
    pub static ref SENDS_IN_FLIGHT: IntGauge = register_int_gauge!(
        format!("{}_sends_in_flight", METRIC_PREFIX),
        "Number of transport sends in progress"
    ).unwrap();

    /// Transport latency for one message
    pub static ref SEND_LATENCY: Histogram = register_histogram!(
        format!("{}_send_latency_seconds", METRIC_PREFIX),
        "Transport send latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Duration of a whole batch
    pub static ref BATCH_DURATION: Histogram = register_histogram!(
        format!("{}_batch_duration_seconds", METRIC_PREFIX),
        "Duration of a send_all batch in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    ).unwrap();
}
