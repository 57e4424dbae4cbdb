//! Cache operation message kinds and request/response envelopes
//!
//! Each operation maps to a distinct kind. Message bodies are modeled as
//! tagged enums rather than a generic byte-message factory — the
//! discriminant itself carries the dispatch.

use crate::Filter;
use std::sync::Arc;
use std::time::Duration;

/// Distinct message kinds, one per cache operation, plus the
/// service-level `EnsureCache`/`DestroyCache`/name-service lookup kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Get,
    GetAll,
    ContainsKey,
    ContainsValue,
    ContainsAll,
    Put,
    PutAll,
    Remove,
    RemoveAll,
    Size,
    IsEmpty,
    Clear,
    Truncate,
    Query,
    GetKeysPage,
    Invoke,
    InvokeAllKeys,
    InvokeAllFilter,
    AggregateKeys,
    AggregateFilter,
    AddIndex,
    RemoveIndex,
    ListenerFilter,
    ListenerKey,
    Lock,
    Unlock,
    EnsureCache,
    DestroyCache,
    LookupNameService,
}

/// How a `put`/similar TTL should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlSpec {
    /// `0`: use the cache's configured default TTL.
    Default,
    /// Negative sentinel: never expire.
    Never,
    /// Positive milliseconds.
    Millis(u64),
}

impl TtlSpec {
    pub fn from_millis(ttl_ms: i64) -> Self {
        match ttl_ms.cmp(&0) {
            std::cmp::Ordering::Equal => TtlSpec::Default,
            std::cmp::Ordering::Less => TtlSpec::Never,
            std::cmp::Ordering::Greater => TtlSpec::Millis(ttl_ms as u64),
        }
    }

    pub fn from_duration(d: Duration) -> Self {
        TtlSpec::Millis(d.as_millis() as u64)
    }
}

/// One row of a query/key-page response.
#[derive(Debug, Clone)]
pub struct QueryRow {
    pub key: Vec<u8>,
    /// `None` for `keys_only` queries.
    pub value: Option<Vec<u8>>,
}

/// An opaque payload describing a failure the proxy returned.
#[derive(Debug, Clone)]
pub struct FailurePayload {
    pub message: String,
    /// `true` when `message` is a re-raised remote exception's message and
    /// should be preserved verbatim; `false` when it is an opaque error
    /// that should be wrapped generically.
    pub is_encoded_exception: bool,
}

/// Request bodies, one variant per `MessageKind`.
#[derive(Debug, Clone)]
pub enum CacheRequest {
    Get { cache: String, key: Vec<u8> },
    GetAll { cache: String, keys: Vec<Vec<u8>> },
    ContainsKey { cache: String, key: Vec<u8> },
    ContainsValue { cache: String, value: Vec<u8> },
    ContainsAll { cache: String, keys: Vec<Vec<u8>> },
    Put { cache: String, key: Vec<u8>, value: Vec<u8>, ttl: TtlSpec, return_old: bool },
    PutAll { cache: String, entries: Vec<(Vec<u8>, Vec<u8>)> },
    Remove { cache: String, key: Vec<u8>, return_old: bool },
    RemoveAll { cache: String, keys: Vec<Vec<u8>> },
    Size { cache: String },
    IsEmpty { cache: String },
    Clear { cache: String },
    Truncate { cache: String },
    Query {
        cache: String,
        filter: Option<Arc<dyn Filter>>,
        keys_only: bool,
        cookie: Option<Vec<u8>>,
        filter_cookie: Option<Vec<u8>>,
    },
    GetKeysPage { cache: String, cookie: Option<Vec<u8>> },
    Invoke { cache: String, key: Vec<u8>, processor: Vec<u8> },
    InvokeAllKeys { cache: String, keys: Vec<Vec<u8>>, processor: Vec<u8> },
    InvokeAllFilter { cache: String, filter: Arc<dyn Filter>, processor: Vec<u8> },
    AggregateKeys { cache: String, keys: Vec<Vec<u8>>, aggregator: Vec<u8> },
    AggregateFilter { cache: String, filter: Arc<dyn Filter>, aggregator: Vec<u8> },
    AddIndex { cache: String, extractor: Vec<u8>, ordered: bool },
    RemoveIndex { cache: String, extractor: Vec<u8> },
    ListenerFilter {
        cache: String,
        filter_id: i64,
        filter: Option<Arc<dyn Filter>>,
        add: bool,
        lite: bool,
        trigger: Option<Vec<u8>>,
        priming: bool,
    },
    ListenerKey { cache: String, key: Vec<u8>, add: bool, lite: bool, priming: bool },
    Lock { cache: String, key: Vec<u8>, wait_millis: i64 },
    Unlock { cache: String, key: Vec<u8> },
    EnsureCache { name: String },
    DestroyCache { name: String },
    LookupNameService { service: String },
}

impl CacheRequest {
    pub fn kind(&self) -> MessageKind {
        match self {
            CacheRequest::Get { .. } => MessageKind::Get,
            CacheRequest::GetAll { .. } => MessageKind::GetAll,
            CacheRequest::ContainsKey { .. } => MessageKind::ContainsKey,
            CacheRequest::ContainsValue { .. } => MessageKind::ContainsValue,
            CacheRequest::ContainsAll { .. } => MessageKind::ContainsAll,
            CacheRequest::Put { .. } => MessageKind::Put,
            CacheRequest::PutAll { .. } => MessageKind::PutAll,
            CacheRequest::Remove { .. } => MessageKind::Remove,
            CacheRequest::RemoveAll { .. } => MessageKind::RemoveAll,
            CacheRequest::Size { .. } => MessageKind::Size,
            CacheRequest::IsEmpty { .. } => MessageKind::IsEmpty,
            CacheRequest::Clear { .. } => MessageKind::Clear,
            CacheRequest::Truncate { .. } => MessageKind::Truncate,
            CacheRequest::Query { .. } => MessageKind::Query,
            CacheRequest::GetKeysPage { .. } => MessageKind::GetKeysPage,
            CacheRequest::Invoke { .. } => MessageKind::Invoke,
            CacheRequest::InvokeAllKeys { .. } => MessageKind::InvokeAllKeys,
            CacheRequest::InvokeAllFilter { .. } => MessageKind::InvokeAllFilter,
            CacheRequest::AggregateKeys { .. } => MessageKind::AggregateKeys,
            CacheRequest::AggregateFilter { .. } => MessageKind::AggregateFilter,
            CacheRequest::AddIndex { .. } => MessageKind::AddIndex,
            CacheRequest::RemoveIndex { .. } => MessageKind::RemoveIndex,
            CacheRequest::ListenerFilter { .. } => MessageKind::ListenerFilter,
            CacheRequest::ListenerKey { .. } => MessageKind::ListenerKey,
            CacheRequest::Lock { .. } => MessageKind::Lock,
            CacheRequest::Unlock { .. } => MessageKind::Unlock,
            CacheRequest::EnsureCache { .. } => MessageKind::EnsureCache,
            CacheRequest::DestroyCache { .. } => MessageKind::DestroyCache,
            CacheRequest::LookupNameService { .. } => MessageKind::LookupNameService,
        }
    }
}

/// Response bodies. A single shape per broad return-type family rather
/// than one per request, since many requests share a response shape.
#[derive(Debug, Clone)]
pub enum CacheResponse {
    Value(Option<Vec<u8>>),
    Values(Vec<Option<Vec<u8>>>),
    Bool(bool),
    Count(u64),
    Unit,
    QueryPage {
        rows: Vec<QueryRow>,
        cookie: Option<Vec<u8>>,
        /// Advanced limit-filter anchors/cookie, when the request carried a
        /// `LimitFilter`.
        limit_advance: Option<LimitAdvance>,
    },
    FilterId(i64),
    Uri(String),
    LockToken(Option<String>),
    Failure(FailurePayload),
}

/// The anchor/cookie advance a `LimitFilter` receives from a partial
/// query response.
#[derive(Debug, Clone)]
pub struct LimitAdvance {
    pub bottom_anchor: Option<Vec<u8>>,
    pub top_anchor: Option<Vec<u8>>,
    pub cookie: Option<Vec<u8>>,
}

impl CacheResponse {
    pub fn is_failure(&self) -> bool {
        matches!(self, CacheResponse::Failure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_spec_classification() {
        assert_eq!(TtlSpec::from_millis(0), TtlSpec::Default);
        assert_eq!(TtlSpec::from_millis(-1), TtlSpec::Never);
        assert_eq!(TtlSpec::from_millis(500), TtlSpec::Millis(500));
    }

    #[test]
    fn test_request_kind_mapping() {
        let req = CacheRequest::Get { cache: "c".into(), key: vec![1] };
        assert_eq!(req.kind(), MessageKind::Get);
    }

    #[test]
    fn test_response_is_failure() {
        let r = CacheResponse::Failure(FailurePayload { message: "x".into(), is_encoded_exception: false });
        assert!(r.is_failure());
        assert!(!CacheResponse::Unit.is_failure());
    }
}
