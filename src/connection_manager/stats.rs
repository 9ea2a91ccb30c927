//! Connection statistics and delivery accounting

use serde::Serialize;

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_identities: usize,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Connections the message was queued on
    pub delivered: usize,
    /// Connections whose send failed
    pub failed: usize,
}

impl DeliveryResult {
    pub fn new(delivered: usize, failed: usize) -> Self {
        Self { delivered, failed }
    }

    /// Number of connections a send was attempted on
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}
