//! Shared in-process "cluster" state backing the mock transport

use extend_core::{
    CacheEvent, CacheRequest, CacheResponse, EventKind, FailurePayload, Filter, LimitAdvance,
    ProxyProtocolVersion, QueryRow, Result, TransformState, TtlSpec,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Per-named-cache storage and subscription bookkeeping.
#[derive(Default)]
struct CacheTable {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    key_subs: HashSet<Vec<u8>>,
    filter_subs: HashMap<i64, Arc<dyn Filter>>,
    locked: HashSet<Vec<u8>>,
}

/// Shared state standing in for the cluster-side proxy: a map of named
/// caches plus enough subscription bookkeeping to push plausible events
/// back through a channel's `UnsolicitedReceiver`.
///
/// This is a test double, not a production transport: the cluster-side
/// proxy is treated as a black box that honors the request/response
/// contract.
pub struct MockCluster {
    caches: RwLock<HashMap<String, CacheTable>>,
    protocol_version: ProxyProtocolVersion,
}

/// An event the cluster decided to push, paired with the cache it
/// originated from (so callers can route to the right channel/receiver).
pub struct PushedEvent {
    pub cache: String,
    pub event: CacheEvent,
}

impl MockCluster {
    pub fn new(protocol_version: ProxyProtocolVersion) -> Arc<Self> {
        Arc::new(Self {
            caches: RwLock::new(HashMap::new()),
            protocol_version,
        })
    }

    pub fn protocol_version(&self) -> ProxyProtocolVersion {
        self.protocol_version
    }

    fn with_table<R>(&self, cache: &str, f: impl FnOnce(&mut CacheTable) -> R) -> R {
        let mut caches = self.caches.write();
        let table = caches.entry(cache.to_string()).or_default();
        f(table)
    }

    /// Handle one request, optionally producing an event to push.
    pub fn handle(&self, req: CacheRequest) -> (Result<CacheResponse>, Option<PushedEvent>) {
        match req {
            CacheRequest::Get { cache, key } => {
                let value = self.with_table(&cache, |t| t.entries.get(&key).cloned());
                (Ok(CacheResponse::Value(value)), None)
            }
            CacheRequest::GetAll { cache, keys } => {
                let values = self.with_table(&cache, |t| {
                    keys.iter().map(|k| t.entries.get(k).cloned()).collect()
                });
                (Ok(CacheResponse::Values(values)), None)
            }
            CacheRequest::ContainsKey { cache, key } => {
                let present = self.with_table(&cache, |t| t.entries.contains_key(&key));
                (Ok(CacheResponse::Bool(present)), None)
            }
            CacheRequest::ContainsValue { cache, value } => {
                let present = self.with_table(&cache, |t| t.entries.values().any(|v| v == &value));
                (Ok(CacheResponse::Bool(present)), None)
            }
            CacheRequest::ContainsAll { cache, keys } => {
                let all = self.with_table(&cache, |t| keys.iter().all(|k| t.entries.contains_key(k)));
                (Ok(CacheResponse::Bool(all)), None)
            }
            CacheRequest::Put { cache, key, value, ttl, return_old } => {
                if let TtlSpec::Never = ttl {
                    // never-expire sentinel: accepted unconditionally by the mock.
                }
                let old = self.with_table(&cache, |t| t.entries.insert(key.clone(), value.clone()));
                let kind = if old.is_some() { EventKind::Updated } else { EventKind::Inserted };
                let pushed = self.maybe_push(&cache, kind, key, old.clone(), Some(value));
                let resp = if return_old { CacheResponse::Value(old) } else { CacheResponse::Unit };
                (Ok(resp), pushed)
            }
            CacheRequest::PutAll { cache, entries } => {
                let mut pushed = None;
                for (key, value) in entries {
                    let old = self.with_table(&cache, |t| t.entries.insert(key.clone(), value.clone()));
                    let kind = if old.is_some() { EventKind::Updated } else { EventKind::Inserted };
                    // Only the last generated event is returned by this simplified
                    // mock; tests that need per-key fan-out issue separate `put`s.
                    pushed = self.maybe_push(&cache, kind, key, old, Some(value)).or(pushed);
                }
                (Ok(CacheResponse::Unit), pushed)
            }
            CacheRequest::Remove { cache, key, return_old } => {
                let old = self.with_table(&cache, |t| t.entries.remove(&key));
                let pushed = old.clone().map(|old_val| {
                    self.maybe_push(&cache, EventKind::Deleted, key, Some(old_val), None)
                }).flatten();
                let resp = if return_old { CacheResponse::Value(old) } else { CacheResponse::Unit };
                (Ok(resp), pushed)
            }
            CacheRequest::RemoveAll { cache, keys } => {
                let mut pushed = None;
                for key in keys {
                    let old = self.with_table(&cache, |t| t.entries.remove(&key));
                    if let Some(old_val) = old {
                        pushed = self.maybe_push(&cache, EventKind::Deleted, key, Some(old_val), None).or(pushed);
                    }
                }
                (Ok(CacheResponse::Unit), pushed)
            }
            CacheRequest::Size { cache } => {
                let n = self.with_table(&cache, |t| t.entries.len());
                (Ok(CacheResponse::Count(n as u64)), None)
            }
            CacheRequest::IsEmpty { cache } => {
                let empty = self.with_table(&cache, |t| t.entries.is_empty());
                (Ok(CacheResponse::Bool(empty)), None)
            }
            CacheRequest::Clear { cache } => {
                self.with_table(&cache, |t| t.entries.clear());
                (Ok(CacheResponse::Unit), None)
            }
            CacheRequest::Truncate { cache } => {
                if !self.protocol_version.supports(extend_core::Feature::Truncate) {
                    return (
                        Ok(CacheResponse::Failure(FailurePayload {
                            message: "truncate unsupported by proxy".into(),
                            is_encoded_exception: false,
                        })),
                        None,
                    );
                }
                self.with_table(&cache, |t| t.entries.clear());
                (Ok(CacheResponse::Unit), None)
            }
            CacheRequest::Query { cache, filter, keys_only, cookie, filter_cookie } => {
                let is_limit = filter.as_deref().and_then(|f| f.as_limit_filter()).is_some();
                let resume = if is_limit { filter_cookie } else { cookie };
                (Ok(self.run_query(&cache, filter.as_deref(), keys_only, resume)), None)
            }
            CacheRequest::GetKeysPage { cache, cookie } => {
                (Ok(self.run_query(&cache, None, true, cookie)), None)
            }
            CacheRequest::ListenerKey { cache, key, add, lite: _, priming } => {
                self.with_table(&cache, |t| {
                    if add {
                        t.key_subs.insert(key.clone());
                    } else {
                        t.key_subs.remove(&key);
                    }
                });
                let pushed = if add && priming {
                    let value = self.with_table(&cache, |t| t.entries.get(&key).cloned());
                    value.map(|v| PushedEvent {
                        cache: cache.clone(),
                        event: CacheEvent {
                            source: cache,
                            kind: EventKind::Updated,
                            key: Some(key),
                            old_value: None,
                            new_value: Some(v),
                            is_synthetic: true,
                            transform_state: TransformState::NonTransformable,
                            is_priming: true,
                            filters: None,
                            filter_ids: None,
                        },
                    })
                } else {
                    None
                };
                (Ok(CacheResponse::Unit), pushed)
            }
            CacheRequest::ListenerFilter { cache, filter_id, filter, add, lite: _, trigger: _, priming } => {
                if add {
                    if priming && filter.as_ref().map(|f| f.is_key_set_filter()).unwrap_or(false)
                        && !self.protocol_version.supports(extend_core::Feature::PrimingOverKeySetFilter)
                    {
                        return (
                            Ok(CacheResponse::Failure(FailurePayload {
                                message: "priming over in-key-set filter unsupported by proxy".into(),
                                is_encoded_exception: false,
                            })),
                            None,
                        );
                    }
                    if let Some(f) = filter {
                        self.with_table(&cache, |t| {
                            t.filter_subs.insert(filter_id, f);
                        });
                    }
                } else {
                    self.with_table(&cache, |t| {
                        t.filter_subs.remove(&filter_id);
                    });
                }
                (Ok(CacheResponse::FilterId(filter_id)), None)
            }
            CacheRequest::Lock { cache, key, wait_millis: _ } => {
                let acquired = self.with_table(&cache, |t| t.locked.insert(key));
                (Ok(CacheResponse::Bool(acquired)), None)
            }
            CacheRequest::Unlock { cache, key } => {
                let had = self.with_table(&cache, |t| t.locked.remove(&key));
                (Ok(CacheResponse::Bool(had)), None)
            }
            CacheRequest::EnsureCache { name } => {
                self.with_table(&name, |_| {});
                (Ok(CacheResponse::Uri(format!("mock://cache/{name}"))), None)
            }
            CacheRequest::DestroyCache { name } => {
                self.caches.write().remove(&name);
                (Ok(CacheResponse::Unit), None)
            }
            CacheRequest::LookupNameService { service } => {
                (Ok(CacheResponse::Uri(format!("mock://service/{service}"))), None)
            }
            CacheRequest::Invoke { .. }
            | CacheRequest::InvokeAllKeys { .. }
            | CacheRequest::InvokeAllFilter { .. }
            | CacheRequest::AggregateKeys { .. }
            | CacheRequest::AggregateFilter { .. }
            | CacheRequest::AddIndex { .. }
            | CacheRequest::RemoveIndex { .. } => (
                Ok(CacheResponse::Failure(FailurePayload {
                    message: "mock transport does not model entry processors/aggregators/indexes".into(),
                    is_encoded_exception: false,
                })),
                None,
            ),
        }
    }

    fn maybe_push(
        &self,
        cache: &str,
        kind: EventKind,
        key: Vec<u8>,
        old_value: Option<Vec<u8>>,
        new_value: Option<Vec<u8>>,
    ) -> Option<PushedEvent> {
        let probe = CacheEvent {
            source: cache.to_string(),
            kind,
            key: Some(key.clone()),
            old_value: old_value.clone(),
            new_value: new_value.clone(),
            is_synthetic: false,
            transform_state: TransformState::NonTransformable,
            is_priming: false,
            filters: None,
            filter_ids: None,
        };

        let (has_key_sub, matching_ids) = self.with_table(cache, |t| {
            let has_key = t.key_subs.contains(&key);
            let ids: Vec<i64> = t
                .filter_subs
                .iter()
                .filter(|(_, f)| f.evaluate(&probe))
                .map(|(id, _)| *id)
                .collect();
            (has_key, ids)
        });

        if !has_key_sub && matching_ids.is_empty() {
            return None;
        }

        Some(PushedEvent {
            cache: cache.to_string(),
            event: CacheEvent {
                filter_ids: if matching_ids.is_empty() { None } else { Some(matching_ids) },
                ..probe
            },
        })
    }

    fn run_query(
        &self,
        cache: &str,
        filter: Option<&dyn Filter>,
        keys_only: bool,
        cookie: Option<Vec<u8>>,
    ) -> CacheResponse {
        let limit = filter.and_then(|f| f.as_limit_filter());

        self.with_table(cache, |t| {
            let matches = |k: &[u8], v: &[u8]| -> bool {
                match filter {
                    None => true,
                    Some(f) => {
                        let probe = CacheEvent {
                            source: cache.to_string(),
                            kind: EventKind::Inserted,
                            key: Some(k.to_vec()),
                            old_value: None,
                            new_value: Some(v.to_vec()),
                            is_synthetic: true,
                            transform_state: TransformState::NonTransformable,
                            is_priming: false,
                            filters: None,
                            filter_ids: None,
                        };
                        f.evaluate(&probe)
                    }
                }
            };

            match limit {
                Some(lf) => {
                    let page_size = lf.page_size().max(1);
                    let resume_after = cookie.clone();
                    let mut rows = Vec::new();
                    let iter: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)> + '_> = match &resume_after {
                        Some(after) => Box::new(t.entries.range(after.clone()..).skip(1)),
                        None => Box::new(t.entries.iter()),
                    };
                    let mut last_key = None;
                    let mut first_key = None;
                    for (k, v) in iter {
                        if !matches(k, v) {
                            continue;
                        }
                        if first_key.is_none() {
                            first_key = Some(k.clone());
                        }
                        rows.push(QueryRow {
                            key: k.clone(),
                            value: if keys_only { None } else { Some(v.clone()) },
                        });
                        last_key = Some(k.clone());
                        if rows.len() >= page_size {
                            break;
                        }
                    }

                    let more = last_key
                        .as_ref()
                        .map(|lk| t.entries.range(lk.clone()..).skip(1).any(|(k, v)| matches(k, v)))
                        .unwrap_or(false);

                    let next_cookie = if more { last_key.clone() } else { None };

                    CacheResponse::QueryPage {
                        rows,
                        cookie: None,
                        limit_advance: Some(LimitAdvance {
                            bottom_anchor: last_key,
                            top_anchor: first_key,
                            cookie: next_cookie,
                        }),
                    }
                }
                None => {
                    let rows: Vec<QueryRow> = t
                        .entries
                        .iter()
                        .filter(|(k, v)| matches(k, v))
                        .map(|(k, v)| QueryRow {
                            key: k.clone(),
                            value: if keys_only { None } else { Some(v.clone()) },
                        })
                        .collect();
                    CacheResponse::QueryPage { rows, cookie: None, limit_advance: None }
                }
            }
        })
    }
}
