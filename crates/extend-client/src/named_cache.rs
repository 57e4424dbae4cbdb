//! Converter Cache Façade: a typed `NamedCache<K, V, S>` over a
//! `BinaryCache`, converting every input/output through a
//! `ConverterPair`. Also owns the deactivation-listener set, fired once per
//! channel closure as a synthetic null-key `Deleted` event — never
//! forwarded to the server.

use crate::binary_cache::{BinaryCache, ListenerTarget};
use crate::convert::ConverterPair;
use async_trait::async_trait;
use extend_core::{
    CacheEvent, Channel, ClientMetrics, Connection, DeactivationListener, EventKind, Filter,
    KeyAssociation, ListenerKind, MapListener, ProxyProtocolVersion, Result, Serializer,
    UnsolicitedReceiver,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// A decoded `CacheEvent`, handed to [`TypedMapListener`]s.
#[derive(Debug, Clone)]
pub struct TypedCacheEvent<K, V> {
    pub source: String,
    pub kind: EventKind,
    pub key: Option<K>,
    pub old_value: Option<V>,
    pub new_value: Option<V>,
    pub is_synthetic: bool,
    pub is_priming: bool,
}

/// A listener over decoded keys/values, the façade-level counterpart of
/// `extend_core::MapListener`.
#[async_trait]
pub trait TypedMapListener<K, V>: Send + Sync + 'static {
    async fn entry_event(&self, event: TypedCacheEvent<K, V>);

    fn kind(&self) -> ListenerKind {
        ListenerKind::Standard
    }
}

struct TypedListenerAdapter<K, V, S, L> {
    convert: ConverterPair<S>,
    inner: Arc<L>,
    _marker: PhantomData<fn() -> (K, V)>,
}

#[async_trait]
impl<K, V, S, L> MapListener for TypedListenerAdapter<K, V, S, L>
where
    K: DeserializeOwned + Send + Sync + 'static,
    V: DeserializeOwned + Send + Sync + 'static,
    S: Serializer + Send + Sync + 'static,
    L: TypedMapListener<K, V>,
{
    async fn entry_event(&self, event: CacheEvent) {
        let key = event
            .key
            .as_deref()
            .map(|b| self.convert.binary_to_value::<K>(&self.convert.binary_to_undecorated(b)))
            .transpose();
        let old_value = event.old_value.as_deref().map(|b| self.convert.binary_to_value::<V>(b)).transpose();
        let new_value = event.new_value.as_deref().map(|b| self.convert.binary_to_value::<V>(b)).transpose();

        match (key, old_value, new_value) {
            (Ok(key), Ok(old_value), Ok(new_value)) => {
                self.inner
                    .entry_event(TypedCacheEvent {
                        source: event.source,
                        kind: event.kind,
                        key,
                        old_value,
                        new_value,
                        is_synthetic: event.is_synthetic,
                        is_priming: event.is_priming,
                    })
                    .await;
            }
            _ => {
                tracing::error!(target: "extend_client", "dropping event that failed to decode for a typed listener");
            }
        }
    }

    fn kind(&self) -> ListenerKind {
        self.inner.kind()
    }
}

struct DeactivationHandle(Arc<dyn DeactivationListener>);

impl PartialEq for DeactivationHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for DeactivationHandle {}
impl Hash for DeactivationHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

#[derive(Default)]
struct DeactivationSet(Mutex<HashSet<DeactivationHandle>>);

impl DeactivationSet {
    fn add(&self, listener: Arc<dyn DeactivationListener>) {
        self.0.lock().insert(DeactivationHandle(listener));
    }

    fn remove(&self, listener: &Arc<dyn DeactivationListener>) {
        self.0.lock().remove(&DeactivationHandle(listener.clone()));
    }

    async fn fire(&self, cache_name: &str) {
        let listeners: Vec<_> = self.0.lock().iter().map(|h| h.0.clone()).collect();
        let event = CacheEvent::deactivation(cache_name);
        for listener in listeners {
            listener.on_deactivated(event.clone()).await;
        }
    }
}

/// Routes unsolicited traffic for one `NamedCache`'s channel: events go to
/// the owned `BinaryCache`, closure fires deactivation listeners. The
/// `BinaryCache` itself is filled in after the channel is opened (it needs
/// the channel; the channel needs this receiver), hence the `OnceLock`.
struct FacadeReceiver {
    binary: OnceLock<Arc<BinaryCache>>,
    deactivation: Arc<DeactivationSet>,
    cache_name: String,
}

#[async_trait]
impl UnsolicitedReceiver for FacadeReceiver {
    async fn on_message(&self, event: CacheEvent) {
        if let Some(binary) = self.binary.get() {
            binary.on_message(event).await;
        }
    }

    async fn on_channel_closed(&self) {
        self.deactivation.fire(&self.cache_name).await;
    }
}

/// A typed cache handle: converts `K`/`V` to/from the wire binaries a
/// `BinaryCache` speaks, and owns this cache's deactivation listeners.
pub struct NamedCache<K, V, S: Serializer> {
    name: String,
    binary: Arc<BinaryCache>,
    convert: ConverterPair<S>,
    deactivation: Arc<DeactivationSet>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> NamedCache<K, V, S>
where
    K: Serialize + DeserializeOwned + KeyAssociation + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Serializer + Clone + Send + Sync + 'static,
{
    /// Open a channel on `connection` scoped to `cache_name` and build a
    /// façade over it.
    pub async fn connect(
        cache_name: impl Into<String>,
        connection: &dyn Connection,
        service_name: &str,
        principal: Option<&str>,
        serializer: S,
        defer_key_association: bool,
        dispatcher: Arc<crate::listener::EventDispatcher>,
        metrics: Arc<dyn ClientMetrics>,
        protocol_version: ProxyProtocolVersion,
    ) -> Result<Arc<Self>> {
        let cache_name = cache_name.into();
        let deactivation = Arc::new(DeactivationSet::default());
        let receiver = Arc::new(FacadeReceiver {
            binary: OnceLock::new(),
            deactivation: deactivation.clone(),
            cache_name: cache_name.clone(),
        });

        let channel = connection.open_channel(service_name, receiver.clone(), principal).await?;
        let binary = BinaryCache::new(cache_name.clone(), channel, dispatcher, metrics, protocol_version);
        let _ = receiver.binary.set(binary.clone());

        Ok(Arc::new(Self {
            name: cache_name,
            binary,
            convert: ConverterPair::new(serializer, defer_key_association),
            deactivation,
            _marker: PhantomData,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.binary.is_active()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        self.binary.channel()
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let kb = self.convert.key_to_binary(key)?;
        match self.binary.get(kb).await? {
            Some(vb) => Ok(Some(self.convert.binary_to_value(&vb)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>>
    where
        K: Clone + Eq + Hash,
    {
        let kbs = keys.iter().map(|k| self.convert.key_to_binary(k)).collect::<Result<Vec<_>>>()?;
        let values = self.binary.get_all(kbs).await?;
        let mut out = HashMap::new();
        for (key, vb) in keys.iter().zip(values) {
            if let Some(vb) = vb {
                out.insert(key.clone(), self.convert.binary_to_value(&vb)?);
            }
        }
        Ok(out)
    }

    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        let kb = self.convert.key_to_binary(key)?;
        self.binary.contains_key(kb).await
    }

    pub async fn contains_value(&self, value: &V) -> Result<bool> {
        let vb = self.convert.value_to_binary(value)?;
        self.binary.contains_value(vb).await
    }

    pub async fn size(&self) -> Result<u64> {
        self.binary.size().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.binary.is_empty().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.binary.clear().await
    }

    pub async fn truncate(&self) -> Result<()> {
        self.binary.truncate().await
    }

    /// `ttl_ms`: `0` cache default, negative never expire, positive millis.
    pub async fn put(&self, key: &K, value: &V, ttl_ms: i64) -> Result<Option<V>> {
        let kb = self.convert.key_to_binary(key)?;
        let vb = self.convert.value_to_binary(value)?;
        match self.binary.put(kb, vb, ttl_ms, true).await? {
            Some(old) => Ok(Some(self.convert.binary_to_value(&old)?)),
            None => Ok(None),
        }
    }

    pub async fn put_all(&self, entries: &[(K, V)]) -> Result<()> {
        let mut wire = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            wire.push((self.convert.key_to_binary(k)?, self.convert.value_to_binary(v)?));
        }
        self.binary.put_all(wire).await
    }

    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let kb = self.convert.key_to_binary(key)?;
        match self.binary.remove(kb, true).await? {
            Some(old) => Ok(Some(self.convert.binary_to_value(&old)?)),
            None => Ok(None),
        }
    }

    pub async fn remove_all(&self, keys: &[K]) -> Result<()> {
        let kbs = keys.iter().map(|k| self.convert.key_to_binary(k)).collect::<Result<Vec<_>>>()?;
        self.binary.remove_all(kbs).await
    }

    pub async fn lock(&self, key: &K, wait_millis: i64) -> Result<bool> {
        let kb = self.convert.key_to_binary(key)?;
        self.binary.lock(kb, wait_millis).await
    }

    pub async fn unlock(&self, key: &K) -> Result<bool> {
        let kb = self.convert.key_to_binary(key)?;
        self.binary.unlock(kb).await
    }

    pub async fn invoke(&self, key: &K, processor: Vec<u8>) -> Result<Option<V>> {
        let kb = self.convert.key_to_binary(key)?;
        match self.binary.invoke(kb, processor).await? {
            Some(rb) => Ok(Some(self.convert.binary_to_value(&rb)?)),
            None => Ok(None),
        }
    }

    pub async fn add_index(&self, extractor: Vec<u8>, ordered: bool) -> Result<()> {
        self.binary.add_index(extractor, ordered).await
    }

    pub async fn remove_index(&self, extractor: Vec<u8>) -> Result<()> {
        self.binary.remove_index(extractor).await
    }

    pub async fn query(&self, filter: Option<Arc<dyn Filter>>) -> Result<Vec<(K, V)>> {
        let rows = self.binary.query(filter, false).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key: K = self.convert.binary_to_value(&self.convert.binary_to_undecorated(&row.key))?;
            let value: V = self.convert.binary_to_value(row.value.as_deref().unwrap_or_default())?;
            out.push((key, value));
        }
        Ok(out)
    }

    pub async fn key_set(&self, filter: Option<Arc<dyn Filter>>) -> Result<Vec<K>> {
        let rows = self.binary.query(filter, true).await?;
        rows.into_iter()
            .map(|row| self.convert.binary_to_value(&self.convert.binary_to_undecorated(&row.key)))
            .collect()
    }

    pub async fn listener_add<L>(&self, filter: Arc<dyn Filter>, listener: Arc<L>, lite: bool, priming: bool) -> Result<()>
    where
        L: TypedMapListener<K, V>,
    {
        let adapter: Arc<dyn MapListener> = Arc::new(TypedListenerAdapter {
            convert: self.convert.clone(),
            inner: listener,
            _marker: PhantomData,
        });
        self.binary.listener_add(ListenerTarget::Global(filter), adapter, lite, priming, None).await
    }

    pub async fn listener_add_for_key<L>(&self, key: &K, listener: Arc<L>, lite: bool, priming: bool) -> Result<()>
    where
        L: TypedMapListener<K, V>,
    {
        let kb = self.convert.key_to_binary(key)?;
        let adapter: Arc<dyn MapListener> = Arc::new(TypedListenerAdapter {
            convert: self.convert.clone(),
            inner: listener,
            _marker: PhantomData,
        });
        self.binary.listener_add(ListenerTarget::Key(kb), adapter, lite, priming, None).await
    }

    pub fn add_deactivation_listener(&self, listener: Arc<dyn DeactivationListener>) {
        self.deactivation.add(listener);
    }

    pub fn remove_deactivation_listener(&self, listener: &Arc<dyn DeactivationListener>) {
        self.deactivation.remove(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_core::{AlwaysFilter, JsonSerializer, NoopMetrics};
    use crate::listener::{DispatchMode, EventDispatcher};
    use extend_transport::MockConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTypedListener(Arc<AtomicUsize>);

    #[async_trait]
    impl TypedMapListener<String, i32> for CountingTypedListener {
        async fn entry_event(&self, _event: TypedCacheEvent<String, i32>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn kind(&self) -> ListenerKind {
            ListenerKind::Synchronous
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_through_facade() {
        let conn = MockConnection::new();
        let dispatcher = Arc::new(EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics)));
        let cache: Arc<NamedCache<String, i32, JsonSerializer>> = NamedCache::connect(
            "numbers",
            &conn,
            "proxy",
            None,
            JsonSerializer,
            false,
            dispatcher,
            Arc::new(NoopMetrics),
            ProxyProtocolVersion(6),
        )
        .await
        .unwrap();

        cache.put(&"a".to_string(), &1, 0).await.unwrap();
        let v = cache.get(&"a".to_string()).await.unwrap();
        assert_eq!(v, Some(1));
    }

    #[tokio::test]
    async fn test_typed_key_listener_decodes_event() {
        let conn = MockConnection::new();
        let dispatcher = Arc::new(EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics)));
        let cache: Arc<NamedCache<String, i32, JsonSerializer>> = NamedCache::connect(
            "numbers",
            &conn,
            "proxy",
            None,
            JsonSerializer,
            false,
            dispatcher,
            Arc::new(NoopMetrics),
            ProxyProtocolVersion(6),
        )
        .await
        .unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let listener = Arc::new(CountingTypedListener(count.clone()));
        cache.listener_add_for_key(&"a".to_string(), listener, false, false).await.unwrap();

        cache.put(&"a".to_string(), &7, 0).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_decodes_key_and_value() {
        let conn = MockConnection::new();
        let dispatcher = Arc::new(EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics)));
        let cache: Arc<NamedCache<String, i32, JsonSerializer>> = NamedCache::connect(
            "numbers",
            &conn,
            "proxy",
            None,
            JsonSerializer,
            false,
            dispatcher,
            Arc::new(NoopMetrics),
            ProxyProtocolVersion(6),
        )
        .await
        .unwrap();

        cache.put(&"a".to_string(), &1, 0).await.unwrap();
        cache.put(&"b".to_string(), &2, 0).await.unwrap();

        let rows = cache.query(Some(Arc::new(AlwaysFilter))).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
