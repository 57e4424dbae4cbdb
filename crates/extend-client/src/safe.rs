//! Safe Wrapper: a small state machine guarding a `CacheService` and
//! restarting it transparently on channel loss, plus a typed `SafeCache`
//! mirroring the pattern at the cache-handle level.

use crate::convert::ConverterPair;
use crate::listener::EventDispatcher;
use crate::service::CacheService;
use extend_core::{
    ClientMetrics, Connection, ExtendError, Filter, KeyAssociation, ProxyProtocolVersion, Result,
    Serializer,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Started,
    Stopped,
}

/// Guards a `CacheService` reference, restarting it on demand rather than
/// ever handing a caller a dead one.
///
/// A fast path returns the live service with no locking beyond a clone; the
/// slow path takes the instance lock and restarts under the last-known
/// principal.
pub struct SafeService {
    connection: Arc<dyn Connection>,
    service_name: String,
    dispatcher: Arc<EventDispatcher>,
    metrics: Arc<dyn ClientMetrics>,
    protocol_version: ProxyProtocolVersion,
    principal: Mutex<Option<String>>,
    state: Mutex<State>,
    service: Mutex<Option<Arc<CacheService>>>,
}

impl SafeService {
    pub fn new(
        connection: Arc<dyn Connection>,
        service_name: impl Into<String>,
        dispatcher: Arc<EventDispatcher>,
        metrics: Arc<dyn ClientMetrics>,
        protocol_version: ProxyProtocolVersion,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            service_name: service_name.into(),
            dispatcher,
            metrics,
            protocol_version,
            principal: Mutex::new(None),
            state: Mutex::new(State::Initial),
            service: Mutex::new(None),
        })
    }

    /// Start (or restart after an explicit `stop`) under `principal`,
    /// recording it so a future transparent restart reuses the same
    /// identity.
    pub async fn start(&self, principal: Option<&str>) -> Result<Arc<CacheService>> {
        *self.principal.lock() = principal.map(str::to_string);
        *self.state.lock() = State::Initial;
        self.ensure_running(false).await
    }

    /// Explicitly stop. Subsequent `ensure_running` calls fail with
    /// `ExplicitlyStopped` until `start` is called again.
    pub fn stop(&self) {
        *self.state.lock() = State::Stopped;
        if let Some(svc) = self.service.lock().take() {
            svc.release_all();
        }
    }

    /// Return the live `CacheService`, transparently restarting it first if
    /// the tracked instance is gone or its control channel has closed.
    /// `drain`, when set, blocks until the event dispatcher's queue has
    /// drained before returning.
    pub async fn ensure_running(&self, drain: bool) -> Result<Arc<CacheService>> {
        if let Some(svc) = self.service.lock().clone() {
            if svc.is_active() {
                if drain {
                    self.dispatcher.drain().await;
                }
                return Ok(svc);
            }
        }

        let observed = *self.state.lock();
        let svc = match observed {
            State::Stopped => return Err(ExtendError::ExplicitlyStopped),
            State::Initial => {
                let result = self.restart().await;
                self.metrics.record_reconnect(extend_core::ReconnectReason::ExplicitRestart, result.is_ok());
                result?
            }
            State::Started => {
                tracing::warn!(target: "extend_client", service = %self.service_name, "connection lost, restarting");
                let result = self.restart().await;
                self.metrics.record_reconnect(extend_core::ReconnectReason::ChannelClosed, result.is_ok());
                result?
            }
        };

        {
            let mut state = self.state.lock();
            if *state != State::Stopped {
                *state = State::Started;
            }
        }

        *self.service.lock() = Some(svc.clone());
        if drain {
            self.dispatcher.drain().await;
        }
        Ok(svc)
    }

    async fn restart(&self) -> Result<Arc<CacheService>> {
        let principal = self.principal.lock().clone();
        CacheService::connect(
            self.connection.clone(),
            &self.service_name,
            self.dispatcher.clone(),
            self.metrics.clone(),
            self.protocol_version,
            principal.as_deref(),
        )
        .await
    }
}

/// A cache handle whose underlying `BinaryCache` is re-resolved through a
/// `SafeService` before every operation, so a reconnect between calls is
/// invisible to the caller.
pub struct SafeCache<K, V, S: Serializer> {
    safe: Arc<SafeService>,
    name: String,
    principal: Option<String>,
    convert: ConverterPair<S>,
    released: Mutex<bool>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> SafeCache<K, V, S>
where
    K: Serialize + DeserializeOwned + KeyAssociation + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Serializer,
{
    pub fn new(safe: Arc<SafeService>, name: impl Into<String>, principal: Option<String>, serializer: S, defer_key_association: bool) -> Self {
        Self {
            safe,
            name: name.into(),
            principal,
            convert: ConverterPair::new(serializer, defer_key_association),
            released: Mutex::new(false),
            _marker: PhantomData,
        }
    }

    async fn resolve(&self) -> Result<Arc<crate::binary_cache::BinaryCache>> {
        let service = self.safe.ensure_running(false).await?;
        service.ensure_cache(&self.name, self.principal.as_deref()).await
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let binary = self.resolve().await?;
        let kb = self.convert.key_to_binary(key)?;
        match binary.get(kb).await? {
            Some(vb) => Ok(Some(self.convert.binary_to_value(&vb)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &K, value: &V, ttl_ms: i64) -> Result<Option<V>> {
        let binary = self.resolve().await?;
        let kb = self.convert.key_to_binary(key)?;
        let vb = self.convert.value_to_binary(value)?;
        match binary.put(kb, vb, ttl_ms, true).await? {
            Some(old) => Ok(Some(self.convert.binary_to_value(&old)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let binary = self.resolve().await?;
        let kb = self.convert.key_to_binary(key)?;
        match binary.remove(kb, true).await? {
            Some(old) => Ok(Some(self.convert.binary_to_value(&old)?)),
            None => Ok(None),
        }
    }

    pub async fn query(&self, filter: Option<Arc<dyn Filter>>) -> Result<Vec<(K, V)>> {
        let binary = self.resolve().await?;
        let rows = binary.query(filter, false).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key: K = self.convert.binary_to_value(&self.convert.binary_to_undecorated(&row.key))?;
            let value: V = self.convert.binary_to_value(row.value.as_deref().unwrap_or_default())?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// Release this handle locally. Safe to call more than once: a second
    /// call (or one after `destroy`) is a benign no-op, not an error.
    pub async fn release(&self) {
        let mut released = self.released.lock();
        if *released {
            return;
        }
        *released = true;
        if let Ok(service) = self.safe.ensure_running(false).await {
            service.release_cache(&self.name, self.principal.as_deref());
        }
    }

    /// Release locally, then ask the proxy to destroy the cache. Tolerates
    /// having already been released.
    pub async fn destroy(&self) -> Result<()> {
        let mut released = self.released.lock();
        if *released {
            return Ok(());
        }
        *released = true;
        let service = self.safe.ensure_running(false).await?;
        service.destroy_cache(&self.name, self.principal.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::DispatchMode;
    use extend_core::{JsonSerializer, NoopMetrics};
    use extend_transport::MockConnection;

    fn new_safe_service() -> Arc<SafeService> {
        let conn: Arc<dyn Connection> = Arc::new(MockConnection::new());
        let dispatcher = Arc::new(EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics)));
        SafeService::new(conn, "proxy", dispatcher, Arc::new(NoopMetrics), ProxyProtocolVersion(6))
    }

    #[tokio::test]
    async fn test_ensure_running_fails_after_stop() {
        let safe = new_safe_service();
        safe.start(None).await.unwrap();
        safe.stop();
        let err = safe.ensure_running(false).await.unwrap_err();
        assert!(matches!(err, ExtendError::ExplicitlyStopped));
    }

    #[tokio::test]
    async fn test_restart_after_start_again() {
        let safe = new_safe_service();
        safe.start(None).await.unwrap();
        safe.stop();
        let restarted = safe.start(None).await;
        assert!(restarted.is_ok());
    }

    #[tokio::test]
    async fn test_safe_cache_put_get_roundtrip() {
        let safe = new_safe_service();
        safe.start(None).await.unwrap();
        let cache: SafeCache<String, i32, JsonSerializer> =
            SafeCache::new(safe, "numbers", None, JsonSerializer, false);

        cache.put(&"a".to_string(), &5, 0).await.unwrap();
        let v = cache.get(&"a".to_string()).await.unwrap();
        assert_eq!(v, Some(5));
    }

    #[tokio::test]
    async fn test_release_twice_is_benign() {
        let safe = new_safe_service();
        safe.start(None).await.unwrap();
        let cache: SafeCache<String, i32, JsonSerializer> =
            SafeCache::new(safe, "numbers", None, JsonSerializer, false);
        cache.release().await;
        cache.release().await;
    }
}
