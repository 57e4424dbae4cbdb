//! Error taxonomy for the Extend gateway client

use thiserror::Error;

/// Main error type for all client/cache operations.
///
/// Variants mirror the error taxonomy a gateway client must surface to
/// callers: proxy feature gaps, transport loss, server-side failures,
/// framing mistakes, and purely local rejections.
#[derive(Error, Debug, Clone)]
pub enum ExtendError {
    /// The negotiated proxy protocol version does not support the requested
    /// feature. Never silently downgraded — always surfaced to the caller.
    #[error("unsupported by proxy: {0}")]
    UnsupportedByProxy(String),

    /// The channel to the proxy is closed or the connection was severed.
    /// All outstanding requests on the channel fail with this kind.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// The proxy returned a failure response.
    ///
    /// `encoded` is `true` when the payload is a re-raised remote exception
    /// whose message should be preserved as-is; `false` wraps an opaque
    /// error payload in a generic message.
    #[error("server failure: {message}")]
    ServerFailure { message: String, encoded: bool },

    /// A message of unexpected kind arrived on a channel.
    #[error("protocol framing error: {0}")]
    ProtocolFraming(String),

    /// A local, wire-free rejection of an operation (e.g. the wildcard
    /// "lock entire cache" key).
    #[error("unsupported client operation: {0}")]
    UnsupportedOperation(String),

    /// The service has been explicitly stopped; no reconnect is attempted.
    #[error("service has been explicitly stopped")]
    ExplicitlyStopped,

    /// Serialization of a value or key failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization of a value or key failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A request timed out waiting for a response.
    #[error("operation timed out")]
    Timeout,

    /// Anything else: internal invariant violations, lock poisoning, etc.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExtendError {
    /// True for the error kinds the Safe Wrapper treats as "try to
    /// reconnect on next use" rather than a terminal failure.
    pub fn is_channel_loss(&self) -> bool {
        matches!(self, ExtendError::ChannelClosed(_) | ExtendError::Timeout)
    }
}

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ExtendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExtendError::UnsupportedByProxy("truncate".into());
        assert_eq!(err.to_string(), "unsupported by proxy: truncate");

        let err = ExtendError::ServerFailure {
            message: "boom".into(),
            encoded: true,
        };
        assert_eq!(err.to_string(), "server failure: boom");
    }

    #[test]
    fn test_error_clone() {
        let err = ExtendError::Timeout;
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_is_channel_loss() {
        assert!(ExtendError::ChannelClosed("x".into()).is_channel_loss());
        assert!(ExtendError::Timeout.is_channel_loss());
        assert!(!ExtendError::ExplicitlyStopped.is_channel_loss());
    }
}
