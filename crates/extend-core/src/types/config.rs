//! Client configuration
//!
//! Configuration is a structured value built directly in Rust rather than
//! parsed from a document. An XML (or any other) frontend is the caller's
//! concern, same as the core's other external collaborators.

use std::time::Duration;

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub cluster_name: Option<String>,
    pub proxy_service_name: String,
    pub scope_name: Option<String>,
    pub request_timeout: Duration,
    pub defer_key_association_check: bool,
    pub initiator: InitiatorConfig,
}

impl ClientConfig {
    pub fn new(proxy_service_name: impl Into<String>) -> Self {
        Self {
            cluster_name: None,
            proxy_service_name: proxy_service_name.into(),
            scope_name: None,
            request_timeout: Duration::from_secs(30),
            defer_key_association_check: false,
            initiator: InitiatorConfig::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_scope_name(mut self, scope: impl Into<String>) -> Self {
        self.scope_name = Some(scope.into());
        self
    }

    pub fn defer_key_association(mut self, defer: bool) -> Self {
        self.defer_key_association_check = defer;
        self
    }
}

/// The `initiator` subtree: address provider, TCP parameters, name-service
/// bootstrap.
#[derive(Debug, Clone, Default)]
pub struct InitiatorConfig {
    pub addresses: Vec<SocketAddress>,
    pub tcp: TcpParameters,
    pub name_service: Option<NameServiceBootstrap>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TcpParameters {
    pub connect_timeout: Duration,
    pub keep_alive: bool,
    pub tcp_nodelay: bool,
}

impl Default for TcpParameters {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keep_alive: true,
            tcp_nodelay: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NameServiceBootstrap {
    pub cluster_name: String,
    pub addresses: Vec<SocketAddress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let cfg = ClientConfig::new("proxy");
        assert_eq!(cfg.proxy_service_name, "proxy");
        assert!(!cfg.defer_key_association_check);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_fluent() {
        let cfg = ClientConfig::new("proxy")
            .with_request_timeout(Duration::from_millis(500))
            .with_scope_name("scope1")
            .defer_key_association(true);

        assert_eq!(cfg.request_timeout, Duration::from_millis(500));
        assert_eq!(cfg.scope_name.as_deref(), Some("scope1"));
        assert!(cfg.defer_key_association_check);
    }
}
