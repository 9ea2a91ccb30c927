//! Prometheus metrics for the broker.
//!
//! - Connection metrics (open connections, connected identities, active rooms)
//! - Handshake metrics (rejections by reason)
//! - Message metrics (received, malformed, delivered, failed sends)

mod helpers;

pub use helpers::{encode_metrics, HandshakeMetrics, MessageMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "broker";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of open WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of open WebSocket connections"
    ).unwrap();

    /// Number of identities holding at least one connection
    pub static ref IDENTITIES_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_identities_connected", METRIC_PREFIX),
        "Number of identities with at least one open connection"
    ).unwrap();

    /// Rooms with at least one member
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Total number of rooms with at least one member"
    ).unwrap();

    // ============================================================================
    // Handshake Metrics
    // ============================================================================

    /// Rejected handshakes by reason
    pub static ref HANDSHAKES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_handshakes_rejected_total", METRIC_PREFIX),
        "Total handshakes rejected before upgrade",
        &["reason"]
    ).unwrap();

    /// Accepted handshakes
    pub static ref HANDSHAKES_ACCEPTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_handshakes_accepted_total", METRIC_PREFIX),
        "Total handshakes accepted and upgraded"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Inbound frames handed to the application
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total well-formed messages received from clients"
    ).unwrap();

    /// Inbound frames dropped as malformed
    pub static ref MESSAGES_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_malformed_total", METRIC_PREFIX),
        "Total inbound frames rejected as malformed"
    ).unwrap();

    /// Outbound messages enqueued on a connection
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages delivered to connections"
    ).unwrap();

    /// Outbound sends that failed
    pub static ref SEND_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_failures_total", METRIC_PREFIX),
        "Total per-connection send failures during fan-out"
    ).unwrap();
}
