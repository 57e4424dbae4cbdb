//! Observability trait for the gateway client
//!
//! A small trait with a zero-cost no-op default, plus an optional
//! `tracing`-backed adapter.

use std::time::Duration;

/// A client-side operation, for latency/count tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientOperation {
    Get,
    Put,
    Remove,
    Query,
    Invoke,
    Aggregate,
    ListenerAdd,
    ListenerRemove,
    Lock,
    EnsureCache,
}

impl ClientOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientOperation::Get => "get",
            ClientOperation::Put => "put",
            ClientOperation::Remove => "remove",
            ClientOperation::Query => "query",
            ClientOperation::Invoke => "invoke",
            ClientOperation::Aggregate => "aggregate",
            ClientOperation::ListenerAdd => "listener_add",
            ClientOperation::ListenerRemove => "listener_remove",
            ClientOperation::Lock => "lock",
            ClientOperation::EnsureCache => "ensure_cache",
        }
    }
}

/// Reason a service/cache reconnect was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconnectReason {
    /// Channel observed closed on next use.
    ChannelClosed,
    /// Explicit `start` after a prior `stop`.
    ExplicitRestart,
}

impl ReconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconnectReason::ChannelClosed => "channel_closed",
            ReconnectReason::ExplicitRestart => "explicit_restart",
        }
    }
}

/// Trait for client metrics/observability.
///
/// Implement this to integrate with your metrics system. A `NoopMetrics`
/// is the default so the client has zero overhead when nobody cares.
pub trait ClientMetrics: Send + Sync + 'static {
    /// Record the latency of a completed operation.
    fn record_latency(&self, operation: ClientOperation, duration: Duration);

    /// Record a dispatched event delivery to `count` listeners.
    fn record_event_dispatch(&self, listener_count: usize);

    /// Record an orphaned event (no listener matched).
    fn record_orphaned_event(&self);

    /// Record a service/cache reconnect attempt and whether it succeeded.
    fn record_reconnect(&self, reason: ReconnectReason, succeeded: bool);
}

/// No-op metrics implementation (default). Zero overhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl ClientMetrics for NoopMetrics {
    #[inline]
    fn record_latency(&self, _operation: ClientOperation, _duration: Duration) {}

    #[inline]
    fn record_event_dispatch(&self, _listener_count: usize) {}

    #[inline]
    fn record_orphaned_event(&self) {}

    #[inline]
    fn record_reconnect(&self, _reason: ReconnectReason, _succeeded: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_as_str() {
        assert_eq!(ClientOperation::Get.as_str(), "get");
        assert_eq!(ClientOperation::EnsureCache.as_str(), "ensure_cache");
    }

    #[test]
    fn test_reconnect_reason_as_str() {
        assert_eq!(ReconnectReason::ChannelClosed.as_str(), "channel_closed");
    }

    #[test]
    fn test_noop_metrics() {
        let metrics = NoopMetrics;
        metrics.record_latency(ClientOperation::Get, Duration::from_millis(1));
        metrics.record_event_dispatch(3);
        metrics.record_orphaned_event();
        metrics.record_reconnect(ReconnectReason::ChannelClosed, true);
    }
}
