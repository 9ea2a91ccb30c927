//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::error::{AppError, Result};

use super::{
    HANDSHAKES_ACCEPTED_TOTAL, HANDSHAKES_REJECTED_TOTAL, MESSAGES_DELIVERED_TOTAL,
    MESSAGES_MALFORMED_TOTAL, MESSAGES_RECEIVED_TOTAL, SEND_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    exposition_text(buffer)
}

fn exposition_text(buffer: Vec<u8>) -> Result<String> {
    String::from_utf8(buffer)
        .map_err(|e| AppError::Internal(format!("metrics output is not UTF-8: {e}")))
}

/// Helper struct for recording handshake outcomes
pub struct HandshakeMetrics;

impl HandshakeMetrics {
    pub fn record_accepted() {
        HANDSHAKES_ACCEPTED_TOTAL.inc();
    }

    /// `reason` is a stable code such as `ORIGIN_REJECTED` or `NO_SESSION_COOKIE`
    pub fn record_rejected(reason: &str) {
        HANDSHAKES_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_received() {
        MESSAGES_RECEIVED_TOTAL.inc();
    }

    pub fn record_malformed() {
        MESSAGES_MALFORMED_TOTAL.inc();
    }

    pub fn record_delivered(count: u64) {
        if count > 0 {
            MESSAGES_DELIVERED_TOTAL.inc_by(count);
        }
    }

    pub fn record_failed(count: u64) {
        if count > 0 {
            SEND_FAILURES_TOTAL.inc_by(count);
        }
    }
}
