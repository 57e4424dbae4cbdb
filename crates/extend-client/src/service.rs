//! Remote Cache Service: resolves and tracks one `BinaryCache` channel per
//! `(cache name, principal)` scope.

use crate::binary_cache::BinaryCache;
use crate::convert::map_failure;
use crate::listener::EventDispatcher;
use async_trait::async_trait;
use extend_core::{
    CacheEvent, CacheRequest, CacheResponse, ClientMetrics, Connection, ExtendError,
    ProxyProtocolVersion, Result, UnsolicitedReceiver,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

type ScopeKey = (String, Option<String>);

struct ControlReceiver;

#[async_trait]
impl UnsolicitedReceiver for ControlReceiver {
    async fn on_message(&self, _event: CacheEvent) {}
    async fn on_channel_closed(&self) {}
}

struct ServiceCacheReceiver(Arc<OnceLock<Arc<BinaryCache>>>);

#[async_trait]
impl UnsolicitedReceiver for ServiceCacheReceiver {
    async fn on_message(&self, event: CacheEvent) {
        if let Some(binary) = self.0.get() {
            binary.on_message(event).await;
        }
    }
    async fn on_channel_closed(&self) {}
}

/// Opens channels against a cache-service proxy, resolving cache names to
/// dedicated channels and tracking them in a `(name, principal) ->
/// BinaryCache` store.
pub struct CacheService {
    connection: Arc<dyn Connection>,
    control: Arc<dyn extend_core::Channel>,
    dispatcher: Arc<EventDispatcher>,
    metrics: Arc<dyn ClientMetrics>,
    protocol_version: ProxyProtocolVersion,
    store: Mutex<HashMap<ScopeKey, Arc<BinaryCache>>>,
}

impl CacheService {
    pub async fn connect(
        connection: Arc<dyn Connection>,
        service_name: &str,
        dispatcher: Arc<EventDispatcher>,
        metrics: Arc<dyn ClientMetrics>,
        protocol_version: ProxyProtocolVersion,
        principal: Option<&str>,
    ) -> Result<Arc<Self>> {
        let control = connection.open_channel(service_name, Arc::new(ControlReceiver), principal).await?;
        Ok(Arc::new(Self {
            connection,
            control,
            dispatcher,
            metrics,
            protocol_version,
            store: Mutex::new(HashMap::new()),
        }))
    }

    /// Whether the service's control channel (used for `EnsureCache`,
    /// `DestroyCache`, and name-service lookups) is still open.
    pub fn is_active(&self) -> bool {
        self.control.is_open()
    }

    /// Look up `(name, principal)` in the store and return it if present
    /// and active; otherwise resolve a fresh endpoint via `EnsureCache` and
    /// open a new channel bound to it.
    pub async fn ensure_cache(&self, name: &str, principal: Option<&str>) -> Result<Arc<BinaryCache>> {
        let scope: ScopeKey = (name.to_string(), principal.map(str::to_string));
        if let Some(existing) = self.store.lock().get(&scope).cloned() {
            if existing.is_active() {
                return Ok(existing);
            }
        }

        let uri = match self.control.request(CacheRequest::EnsureCache { name: name.to_string() }).await? {
            CacheResponse::Uri(uri) => uri,
            CacheResponse::Failure(payload) => return Err(map_failure(payload)),
            other => {
                return Err(ExtendError::ProtocolFraming(format!("unexpected response to ensure_cache: {other:?}")));
            }
        };

        let slot: Arc<OnceLock<Arc<BinaryCache>>> = Arc::new(OnceLock::new());
        let receiver = Arc::new(ServiceCacheReceiver(slot.clone()));
        let channel = self.connection.open_channel(&uri, receiver, principal).await?;
        let binary = BinaryCache::new(name, channel, self.dispatcher.clone(), self.metrics.clone(), self.protocol_version);
        let _ = slot.set(binary.clone());

        self.store.lock().insert(scope, binary.clone());
        Ok(binary)
    }

    /// Drop `(name, principal)` from the store without contacting the
    /// server. A no-op, not an error, if it was never present.
    pub fn release_cache(&self, name: &str, principal: Option<&str>) {
        self.store.lock().remove(&(name.to_string(), principal.map(str::to_string)));
    }

    /// Release locally, then tell the proxy to destroy the cache.
    pub async fn destroy_cache(&self, name: &str, principal: Option<&str>) -> Result<()> {
        self.release_cache(name, principal);
        self.control.request(CacheRequest::DestroyCache { name: name.to_string() }).await?;
        Ok(())
    }

    /// Drop every tracked cache. Called on connection loss, before any
    /// caller-visible member-left notification, so that a subsequent
    /// `ensure_cache` restarts cleanly rather than returning a handle over
    /// a channel that will never reopen.
    pub fn release_all(&self) {
        self.store.lock().clear();
    }

    pub async fn lookup_name_service(&self, service: &str) -> Result<String> {
        match self.control.request(CacheRequest::LookupNameService { service: service.to_string() }).await? {
            CacheResponse::Uri(uri) => Ok(uri),
            CacheResponse::Failure(payload) => Err(map_failure(payload)),
            other => Err(ExtendError::ProtocolFraming(format!("unexpected response to lookup_name_service: {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_core::NoopMetrics;
    use extend_transport::MockConnection;
    use crate::listener::DispatchMode;

    async fn new_service() -> Arc<CacheService> {
        let conn = Arc::new(MockConnection::new());
        let dispatcher = Arc::new(EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics)));
        CacheService::connect(conn, "proxy", dispatcher, Arc::new(NoopMetrics), ProxyProtocolVersion(6), None).await.unwrap()
    }

    #[tokio::test]
    async fn test_ensure_cache_is_cached_on_second_call() {
        let service = new_service().await;
        let first = service.ensure_cache("orders", None).await.unwrap();
        let second = service.ensure_cache("orders", None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_destroy_then_reensure_opens_a_fresh_cache() {
        let service = new_service().await;
        let first = service.ensure_cache("orders", None).await.unwrap();
        service.destroy_cache("orders", None).await.unwrap();
        let second = service.ensure_cache("orders", None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_release_all_clears_store() {
        let service = new_service().await;
        service.ensure_cache("orders", None).await.unwrap();
        service.ensure_cache("accounts", None).await.unwrap();
        service.release_all();
        let first = service.ensure_cache("orders", None).await.unwrap();
        let second = service.ensure_cache("orders", None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
