//! Binary Cache Client: speaks the cache wire protocol against a
//! `Channel`; owns the Listener Registry and Filter-ID Table.

use crate::convert::map_failure;
use crate::listener::{EventDispatcher, FilterTable, ListenerRegistry, RunnableCacheEvent, Scope};
use crate::query::{self, Advancer};
use async_trait::async_trait;
use extend_core::{
    CacheEvent, CacheRequest, CacheResponse, Channel, ClientMetrics, ExtendError, Feature, Filter,
    ListenerHandle, ListenerKind, MapListener, ProxyProtocolVersion, QueryRow, Result, UnsolicitedReceiver,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static LOCK_WARNED: AtomicBool = AtomicBool::new(false);

fn proto_err(op: &str, resp: CacheResponse) -> ExtendError {
    ExtendError::ProtocolFraming(format!("unexpected response to {op}: {resp:?}"))
}

fn unwrap_resp(resp: CacheResponse) -> Result<CacheResponse> {
    match resp {
        CacheResponse::Failure(payload) => Err(map_failure(payload)),
        other => Ok(other),
    }
}

/// Which scope a listener registration targets.
pub enum ListenerTarget {
    Global(Arc<dyn Filter>),
    Key(Vec<u8>),
}

/// The cache at the bytes level: all keys and values crossing this API are
/// opaque binaries. Active iff its `Channel` is open — it has no reconnect
/// logic of its own; that is the Safe Wrapper's job.
pub struct BinaryCache {
    cache_name: String,
    channel: Arc<dyn Channel>,
    filter_table: FilterTable,
    listener_registry: ListenerRegistry,
    dispatcher: Arc<EventDispatcher>,
    metrics: Arc<dyn ClientMetrics>,
    protocol_version: ProxyProtocolVersion,
}

impl BinaryCache {
    pub fn new(
        cache_name: impl Into<String>,
        channel: Arc<dyn Channel>,
        dispatcher: Arc<EventDispatcher>,
        metrics: Arc<dyn ClientMetrics>,
        protocol_version: ProxyProtocolVersion,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache_name: cache_name.into(),
            channel,
            filter_table: FilterTable::new(),
            listener_registry: ListenerRegistry::new(),
            dispatcher,
            metrics,
            protocol_version,
        })
    }

    pub fn name(&self) -> &str {
        &self.cache_name
    }

    pub fn is_active(&self) -> bool {
        self.channel.is_open()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    async fn request(&self, msg: CacheRequest) -> Result<CacheResponse> {
        unwrap_resp(self.channel.request(msg).await?)
    }

    pub async fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.request(CacheRequest::Get { cache: self.cache_name.clone(), key }).await? {
            CacheResponse::Value(v) => Ok(v),
            other => Err(proto_err("get", other)),
        }
    }

    pub async fn get_all(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>> {
        match self.request(CacheRequest::GetAll { cache: self.cache_name.clone(), keys }).await? {
            CacheResponse::Values(v) => Ok(v),
            other => Err(proto_err("get_all", other)),
        }
    }

    pub async fn contains_key(&self, key: Vec<u8>) -> Result<bool> {
        self.expect_bool(CacheRequest::ContainsKey { cache: self.cache_name.clone(), key }, "contains_key").await
    }

    pub async fn contains_value(&self, value: Vec<u8>) -> Result<bool> {
        self.expect_bool(CacheRequest::ContainsValue { cache: self.cache_name.clone(), value }, "contains_value").await
    }

    pub async fn contains_all(&self, keys: Vec<Vec<u8>>) -> Result<bool> {
        self.expect_bool(CacheRequest::ContainsAll { cache: self.cache_name.clone(), keys }, "contains_all").await
    }

    pub async fn size(&self) -> Result<u64> {
        match self.request(CacheRequest::Size { cache: self.cache_name.clone() }).await? {
            CacheResponse::Count(n) => Ok(n),
            other => Err(proto_err("size", other)),
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.expect_bool(CacheRequest::IsEmpty { cache: self.cache_name.clone() }, "is_empty").await
    }

    pub async fn clear(&self) -> Result<()> {
        self.request(CacheRequest::Clear { cache: self.cache_name.clone() }).await?;
        Ok(())
    }

    /// Fails with `UnsupportedByProxy` when the negotiated protocol version
    /// is <= 5, without sending any wire message.
    pub async fn truncate(&self) -> Result<()> {
        if !self.protocol_version.supports(Feature::Truncate) {
            return Err(ExtendError::UnsupportedByProxy("truncate".into()));
        }
        self.request(CacheRequest::Truncate { cache: self.cache_name.clone() }).await?;
        Ok(())
    }

    /// `ttl`: `0` = cache default, negative = never expire, positive =
    /// milliseconds. The server surfaces unsupported TTLs as
    /// a failure response; there is no silent fallback.
    pub async fn put(&self, key: Vec<u8>, value: Vec<u8>, ttl_ms: i64, return_old: bool) -> Result<Option<Vec<u8>>> {
        let ttl = extend_core::TtlSpec::from_millis(ttl_ms);
        match self
            .request(CacheRequest::Put { cache: self.cache_name.clone(), key, value, ttl, return_old })
            .await?
        {
            CacheResponse::Value(v) => Ok(v),
            CacheResponse::Unit => Ok(None),
            other => Err(proto_err("put", other)),
        }
    }

    pub async fn put_all(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        self.request(CacheRequest::PutAll { cache: self.cache_name.clone(), entries }).await?;
        Ok(())
    }

    pub async fn remove(&self, key: Vec<u8>, return_old: bool) -> Result<Option<Vec<u8>>> {
        match self.request(CacheRequest::Remove { cache: self.cache_name.clone(), key, return_old }).await? {
            CacheResponse::Value(v) => Ok(v),
            CacheResponse::Unit => Ok(None),
            other => Err(proto_err("remove", other)),
        }
    }

    pub async fn remove_all(&self, keys: Vec<Vec<u8>>) -> Result<()> {
        self.request(CacheRequest::RemoveAll { cache: self.cache_name.clone(), keys }).await?;
        Ok(())
    }

    /// The wildcard "lock entire cache" key (represented here as an empty
    /// key) is rejected locally, with no wire traffic.
    pub async fn lock(&self, key: Vec<u8>, wait_millis: i64) -> Result<bool> {
        if key.is_empty() {
            return Err(ExtendError::UnsupportedOperation("wildcard lock of entire cache is not supported".into()));
        }
        if !LOCK_WARNED.swap(true, Ordering::SeqCst) {
            tracing::warn!(target: "extend_client", "lock/unlock is deprecated and may be removed in a future proxy protocol");
        }
        self.expect_bool(CacheRequest::Lock { cache: self.cache_name.clone(), key, wait_millis }, "lock").await
    }

    pub async fn unlock(&self, key: Vec<u8>) -> Result<bool> {
        if key.is_empty() {
            return Err(ExtendError::UnsupportedOperation("wildcard unlock of entire cache is not supported".into()));
        }
        if !LOCK_WARNED.swap(true, Ordering::SeqCst) {
            tracing::warn!(target: "extend_client", "lock/unlock is deprecated and may be removed in a future proxy protocol");
        }
        self.expect_bool(CacheRequest::Unlock { cache: self.cache_name.clone(), key }, "unlock").await
    }

    pub async fn invoke(&self, key: Vec<u8>, processor: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.request(CacheRequest::Invoke { cache: self.cache_name.clone(), key, processor }).await? {
            CacheResponse::Value(v) => Ok(v),
            other => Err(proto_err("invoke", other)),
        }
    }

    pub async fn invoke_all_keys(&self, keys: Vec<Vec<u8>>, processor: Vec<u8>) -> Result<Vec<Option<Vec<u8>>>> {
        match self.request(CacheRequest::InvokeAllKeys { cache: self.cache_name.clone(), keys, processor }).await? {
            CacheResponse::Values(v) => Ok(v),
            other => Err(proto_err("invoke_all_keys", other)),
        }
    }

    pub async fn invoke_all_filter(&self, filter: Arc<dyn Filter>, processor: Vec<u8>) -> Result<Vec<Option<Vec<u8>>>> {
        match self.request(CacheRequest::InvokeAllFilter { cache: self.cache_name.clone(), filter, processor }).await? {
            CacheResponse::Values(v) => Ok(v),
            other => Err(proto_err("invoke_all_filter", other)),
        }
    }

    pub async fn aggregate_keys(&self, keys: Vec<Vec<u8>>, aggregator: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.request(CacheRequest::AggregateKeys { cache: self.cache_name.clone(), keys, aggregator }).await? {
            CacheResponse::Value(v) => Ok(v),
            other => Err(proto_err("aggregate_keys", other)),
        }
    }

    pub async fn aggregate_filter(&self, filter: Arc<dyn Filter>, aggregator: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.request(CacheRequest::AggregateFilter { cache: self.cache_name.clone(), filter, aggregator }).await? {
            CacheResponse::Value(v) => Ok(v),
            other => Err(proto_err("aggregate_filter", other)),
        }
    }

    pub async fn add_index(&self, extractor: Vec<u8>, ordered: bool) -> Result<()> {
        self.request(CacheRequest::AddIndex { cache: self.cache_name.clone(), extractor, ordered }).await?;
        Ok(())
    }

    pub async fn remove_index(&self, extractor: Vec<u8>) -> Result<()> {
        self.request(CacheRequest::RemoveIndex { cache: self.cache_name.clone(), extractor }).await?;
        Ok(())
    }

    pub async fn query(&self, filter: Option<Arc<dyn Filter>>, keys_only: bool) -> Result<Vec<QueryRow>> {
        query::run_query(self.channel.as_ref(), &self.cache_name, filter, keys_only).await
    }

    pub fn get_keys_page(&self) -> Advancer {
        Advancer::new(self.cache_name.clone())
    }

    async fn expect_bool(&self, req: CacheRequest, op: &str) -> Result<bool> {
        match self.request(req).await? {
            CacheResponse::Bool(b) => Ok(b),
            other => Err(proto_err(op, other)),
        }
    }

    /// Add a listener. Handles the server-subscribe de-duplication rules:
    /// a lite->standard upgrade always sends, a fresh scope always sends,
    /// priming always sends, everything else is a local-only registration.
    pub async fn listener_add(
        &self,
        target: ListenerTarget,
        listener: Arc<dyn MapListener>,
        lite: bool,
        priming: bool,
        trigger: Option<Vec<u8>>,
    ) -> Result<()> {
        if let ListenerTarget::Global(f) = &target {
            if f.is_key_set_filter() && lite && !self.protocol_version.supports(Feature::PrimingOverKeySetFilter) {
                return Err(ExtendError::UnsupportedByProxy("lite listener over in-key-set filter".into()));
            }
        }

        let handle = ListenerHandle::new(listener);
        let scope = match &target {
            ListenerTarget::Global(f) => Scope::Global(f.clone()),
            ListenerTarget::Key(k) => Scope::Key(k.clone()),
        };

        let existed_any = match &target {
            ListenerTarget::Global(f) => !self.listener_registry.is_empty_for_filter(f.as_ref()),
            ListenerTarget::Key(k) => !self.listener_registry.is_empty_for_key(k),
        };
        let existed_standard = match &target {
            ListenerTarget::Global(f) => self.listener_registry.contains_standard_for_filter(f.as_ref()),
            ListenerTarget::Key(k) => self.listener_registry.contains_standard_for_key(k),
        };

        let need_send = priming || !existed_any || (!lite && !existed_standard);

        if need_send {
            match &target {
                ListenerTarget::Global(f) => {
                    let filter_id = self.filter_table.register(f.clone());
                    self.request(CacheRequest::ListenerFilter {
                        cache: self.cache_name.clone(),
                        filter_id,
                        filter: Some(f.clone()),
                        add: true,
                        lite,
                        trigger,
                        priming,
                    })
                    .await?;
                }
                ListenerTarget::Key(k) => {
                    self.request(CacheRequest::ListenerKey {
                        cache: self.cache_name.clone(),
                        key: k.clone(),
                        add: true,
                        lite,
                        priming,
                    })
                    .await?;
                }
            }
        }

        // The post-send local update is a plain in-memory map mutation
        // with no fallible user code in the path, so a failed rollback of
        // the registry after a successful send cannot occur here.
        self.listener_registry.add(handle, scope, lite);
        Ok(())
    }

    pub async fn listener_remove(&self, target: ListenerTarget, listener: Arc<dyn MapListener>) -> Result<()> {
        let handle = ListenerHandle::new(listener);
        let scope = match &target {
            ListenerTarget::Global(f) => Scope::Global(f.clone()),
            ListenerTarget::Key(k) => Scope::Key(k.clone()),
        };
        self.listener_registry.remove(&handle, &scope);

        let now_empty = match &target {
            ListenerTarget::Global(f) => self.listener_registry.is_empty_for_filter(f.as_ref()),
            ListenerTarget::Key(k) => self.listener_registry.is_empty_for_key(k),
        };

        if now_empty {
            match &target {
                ListenerTarget::Global(f) => {
                    let filter_id = self.filter_table.register(f.clone());
                    self.request(CacheRequest::ListenerFilter {
                        cache: self.cache_name.clone(),
                        filter_id,
                        filter: None,
                        add: false,
                        lite: false,
                        trigger: None,
                        priming: false,
                    })
                    .await?;
                    self.filter_table.unregister(filter_id);
                }
                ListenerTarget::Key(k) => {
                    self.request(CacheRequest::ListenerKey {
                        cache: self.cache_name.clone(),
                        key: k.clone(),
                        add: false,
                        lite: false,
                        priming: false,
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UnsolicitedReceiver for BinaryCache {
    async fn on_message(&self, event: CacheEvent) {
        let explicit: Option<Vec<Arc<dyn Filter>>> =
            event.filter_ids.as_ref().map(|ids| ids.iter().filter_map(|id| self.filter_table.lookup(*id)).collect());

        let collected = self.listener_registry.collect(&event, explicit.as_deref());
        if collected.listeners.is_empty() {
            // Orphaned: a concurrent registration could still be racing
            // in, so we log and drop rather than unsubscribe.
            tracing::trace!(target: "extend_client", cache = %self.cache_name, "orphaned event dropped, no listener matched");
            self.metrics.record_orphaned_event();
            return;
        }

        let decorated_event = match collected.matched_filters {
            Some(filters) => CacheEvent { filters: Some(filters), ..event.clone() },
            None => event.clone(),
        };

        let mut async_listeners = Vec::new();
        for listener in collected.listeners {
            if listener.0.kind().dispatches_inline() {
                listener.0.entry_event(decorated_event.clone()).await;
            } else {
                async_listeners.push(listener);
            }
        }
        if !async_listeners.is_empty() {
            self.dispatcher.enqueue(RunnableCacheEvent::ToSet { event: decorated_event, listeners: async_listeners });
        }
    }

    async fn on_channel_closed(&self) {}
}
