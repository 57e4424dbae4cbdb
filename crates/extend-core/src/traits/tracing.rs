use crate::{ClientMetrics, ClientOperation, ReconnectReason};
use std::time::Duration;
use tracing::debug;

/// Metrics adapter that logs events via `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    /// Service name/prefix (optional)
    service_name: Option<String>,
}

impl TracingMetrics {
    /// Create new tracing metrics adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with service name prefix
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl ClientMetrics for TracingMetrics {
    fn record_latency(&self, operation: ClientOperation, duration: Duration) {
        tracing::trace!(
            target: "extend_client",
            event = "latency",
            operation = ?operation,
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "Gateway Operation Latency"
        );
    }

    fn record_event_dispatch(&self, listener_count: usize) {
        debug!(
            target: "extend_client",
            event = "dispatch",
            listener_count,
            service = ?self.service_name,
            "Cache Event Dispatched"
        );
    }

    fn record_orphaned_event(&self) {
        debug!(
            target: "extend_client",
            event = "orphaned",
            service = ?self.service_name,
            "Orphaned Cache Event"
        );
    }

    fn record_reconnect(&self, reason: ReconnectReason, succeeded: bool) {
        debug!(
            target: "extend_client",
            event = "reconnect",
            reason = ?reason,
            succeeded,
            service = ?self.service_name,
            "Service Reconnect"
        );
    }
}
