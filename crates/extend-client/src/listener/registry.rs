//! Listener Registry: bookkeeping for (filter -> listener-set) and
//! (key -> listener-set), plus the optimization-plan
//! fast paths `collect` uses to avoid re-evaluating every filter on the
//! hot event-delivery path.

use extend_core::{CacheEvent, Filter, FilterKey, ListenerHandle, TransformState};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptimizationPlan {
    None,
    NoListeners,
    AllListener,
    KeyListener,
    NoOptimize,
}

/// Which scope a listener is registered against.
#[derive(Clone)]
pub enum Scope {
    Global(Arc<dyn Filter>),
    Key(Vec<u8>),
}

struct GlobalEntry {
    filter: Arc<dyn Filter>,
    all: HashSet<ListenerHandle>,
    standard: HashSet<ListenerHandle>,
}

#[derive(Default)]
struct KeyEntry {
    all: HashSet<ListenerHandle>,
    standard: HashSet<ListenerHandle>,
}

struct Inner {
    global: HashMap<FilterKey, GlobalEntry>,
    by_key: HashMap<Vec<u8>, KeyEntry>,
    plan: OptimizationPlan,
    cached_listeners: Option<HashSet<ListenerHandle>>,
}

/// The set of listeners matched by `collect`, plus (for the `NoOptimize`
/// filter-scan path) which filters actually matched — attached to the
/// outgoing event.
pub struct Collected {
    pub listeners: HashSet<ListenerHandle>,
    pub matched_filters: Option<Vec<Arc<dyn Filter>>>,
}

pub struct ListenerRegistry {
    inner: RwLock<Inner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                global: HashMap::new(),
                by_key: HashMap::new(),
                plan: OptimizationPlan::NoListeners,
                cached_listeners: None,
            }),
        }
    }

    /// Idempotent per (scope, listener). Non-lite registrations join the
    /// "standard" set too; lite registrations clear any prior standard
    /// membership for the same (scope, listener).
    pub fn add(&self, listener: ListenerHandle, scope: Scope, is_lite: bool) {
        let mut inner = self.inner.write();
        match scope {
            Scope::Global(filter) => {
                let key = filter.filter_key();
                let entry = inner
                    .global
                    .entry(key)
                    .or_insert_with(|| GlobalEntry { filter, all: HashSet::new(), standard: HashSet::new() });
                entry.all.insert(listener.clone());
                if is_lite {
                    entry.standard.remove(&listener);
                } else {
                    entry.standard.insert(listener);
                }
            }
            Scope::Key(key) => {
                let entry = inner.by_key.entry(key).or_default();
                entry.all.insert(listener.clone());
                if is_lite {
                    entry.standard.remove(&listener);
                } else {
                    entry.standard.insert(listener);
                }
            }
        }
        inner.plan = OptimizationPlan::None;
        inner.cached_listeners = None;
    }

    /// Remove `listener` from `scope`, dropping the scope entry entirely
    /// once both its sets are empty. A no-op if the listener was never
    /// registered there.
    pub fn remove(&self, listener: &ListenerHandle, scope: &Scope) {
        let mut inner = self.inner.write();
        match scope {
            Scope::Global(filter) => {
                let key = filter.filter_key();
                let drop_entry = if let Some(entry) = inner.global.get_mut(&key) {
                    entry.all.remove(listener);
                    entry.standard.remove(listener);
                    entry.all.is_empty()
                } else {
                    false
                };
                if drop_entry {
                    inner.global.remove(&key);
                }
            }
            Scope::Key(key) => {
                let drop_entry = if let Some(entry) = inner.by_key.get_mut(key) {
                    entry.all.remove(listener);
                    entry.standard.remove(listener);
                    entry.all.is_empty()
                } else {
                    false
                };
                if drop_entry {
                    inner.by_key.remove(key);
                }
            }
        }
        inner.plan = OptimizationPlan::None;
        inner.cached_listeners = None;
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.global.is_empty() && inner.by_key.is_empty()
    }

    pub fn is_empty_for_filter(&self, filter: &dyn Filter) -> bool {
        let inner = self.inner.read();
        !inner.global.contains_key(&filter.filter_key())
    }

    pub fn is_empty_for_key(&self, key: &[u8]) -> bool {
        let inner = self.inner.read();
        !inner.by_key.contains_key(key)
    }

    pub fn contains_standard_for_filter(&self, filter: &dyn Filter) -> bool {
        let inner = self.inner.read();
        inner
            .global
            .get(&filter.filter_key())
            .map(|e| !e.standard.is_empty())
            .unwrap_or(false)
    }

    pub fn contains_standard_for_key(&self, key: &[u8]) -> bool {
        let inner = self.inner.read();
        inner.by_key.get(key).map(|e| !e.standard.is_empty()).unwrap_or(false)
    }

    /// Resolve the listeners for `event`. `explicit_filters` is `Some` when
    /// the server tagged the event with filter ids that the caller has
    /// already resolved via the Filter-ID Table; `None` means fall back to
    /// evaluating every registered filter plus the key map.
    pub fn collect(&self, event: &CacheEvent, explicit_filters: Option<&[Arc<dyn Filter>]>) -> Collected {
        {
            let inner = self.inner.read();
            match inner.plan {
                OptimizationPlan::NoListeners => return Collected { listeners: HashSet::new(), matched_filters: None },
                OptimizationPlan::AllListener => {
                    return Collected { listeners: inner.cached_listeners.clone().unwrap_or_default(), matched_filters: None };
                }
                OptimizationPlan::KeyListener => {
                    let listeners = match &event.key {
                        Some(k) if inner.by_key.contains_key(k) => inner.cached_listeners.clone().unwrap_or_default(),
                        _ => HashSet::new(),
                    };
                    return Collected { listeners, matched_filters: None };
                }
                OptimizationPlan::NoOptimize => return Self::collect_no_optimize(&inner, event, explicit_filters),
                OptimizationPlan::None => {}
            }
        }

        let mut inner = self.inner.write();
        if inner.plan == OptimizationPlan::None {
            Self::recompute_plan(&mut inner);
        }
        match inner.plan {
            OptimizationPlan::NoListeners => Collected { listeners: HashSet::new(), matched_filters: None },
            OptimizationPlan::AllListener => {
                Collected { listeners: inner.cached_listeners.clone().unwrap_or_default(), matched_filters: None }
            }
            OptimizationPlan::KeyListener => {
                let listeners = match &event.key {
                    Some(k) if inner.by_key.contains_key(k) => inner.cached_listeners.clone().unwrap_or_default(),
                    _ => HashSet::new(),
                };
                Collected { listeners, matched_filters: None }
            }
            OptimizationPlan::NoOptimize => Self::collect_no_optimize(&inner, event, explicit_filters),
            OptimizationPlan::None => unreachable!("recompute_plan always leaves a concrete plan"),
        }
    }

    fn recompute_plan(inner: &mut Inner) {
        if inner.global.is_empty() && inner.by_key.is_empty() {
            inner.plan = OptimizationPlan::NoListeners;
            inner.cached_listeners = None;
            return;
        }
        if inner.by_key.is_empty() && inner.global.len() == 1 {
            let entry = inner.global.values().next().expect("len == 1");
            if matches!(entry.filter.filter_key(), FilterKey::None) {
                inner.plan = OptimizationPlan::AllListener;
                inner.cached_listeners = Some(entry.all.clone());
                return;
            }
        }
        if inner.global.is_empty() && !inner.by_key.is_empty() {
            let mut sets = inner.by_key.values();
            let first = &sets.next().expect("non-empty").all;
            if sets.all(|e| &e.all == first) {
                inner.plan = OptimizationPlan::KeyListener;
                inner.cached_listeners = Some(first.clone());
                return;
            }
        }
        inner.plan = OptimizationPlan::NoOptimize;
        inner.cached_listeners = None;
    }

    fn collect_no_optimize(inner: &Inner, event: &CacheEvent, explicit_filters: Option<&[Arc<dyn Filter>]>) -> Collected {
        let mut listeners = HashSet::new();
        let mut matched_filters = None;

        let transformer_excluded = |f: &dyn Filter| f.is_event_transformer() && event.transform_state == TransformState::NonTransformable;

        match explicit_filters {
            Some(filters) => {
                for f in filters {
                    if transformer_excluded(f.as_ref()) {
                        continue;
                    }
                    if let Some(entry) = inner.global.get(&f.filter_key()) {
                        listeners.extend(entry.all.iter().cloned());
                    }
                }
            }
            None => {
                let mut matched = Vec::new();
                for entry in inner.global.values() {
                    if transformer_excluded(entry.filter.as_ref()) {
                        continue;
                    }
                    if entry.filter.evaluate(event) {
                        listeners.extend(entry.all.iter().cloned());
                        matched.push(entry.filter.clone());
                    }
                }
                if !matched.is_empty() {
                    matched_filters = Some(matched);
                }
            }
        }

        if event.transform_state != TransformState::Transformed {
            if let Some(key) = &event.key {
                if let Some(entry) = inner.by_key.get(key) {
                    listeners.extend(entry.all.iter().cloned());
                }
            }
        }

        Collected { listeners, matched_filters }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_core::{AlwaysFilter, EventKind, FilterKey, ListenerKind, MapListener};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingListener {
        received: StdMutex<Vec<CacheEvent>>,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self { received: StdMutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl MapListener for RecordingListener {
        async fn entry_event(&self, event: CacheEvent) {
            self.received.lock().unwrap().push(event);
        }
    }

    #[derive(Debug)]
    struct KeySetFilter(FilterKey);
    impl Filter for KeySetFilter {
        fn filter_key(&self) -> FilterKey {
            self.0.clone()
        }
        fn evaluate(&self, _event: &CacheEvent) -> bool {
            true
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn sample_event(key: Option<Vec<u8>>) -> CacheEvent {
        CacheEvent {
            source: "c".into(),
            kind: EventKind::Updated,
            key,
            old_value: None,
            new_value: None,
            is_synthetic: false,
            transform_state: TransformState::Transformable,
            is_priming: false,
            filters: None,
            filter_ids: None,
        }
    }

    #[test]
    fn test_add_remove_idempotent() {
        let reg = ListenerRegistry::new();
        let l = ListenerHandle::new(RecordingListener::new());
        reg.add(l.clone(), Scope::Key(vec![1]), false);
        assert!(!reg.is_empty_for_key(&[1]));
        reg.remove(&l, &Scope::Key(vec![1]));
        assert!(reg.is_empty_for_key(&[1]));
        // removing again is a no-op, not an error
        reg.remove(&l, &Scope::Key(vec![1]));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_lite_then_standard_upgrade() {
        let reg = ListenerRegistry::new();
        let l = ListenerHandle::new(RecordingListener::new());
        let filter: Arc<dyn Filter> = Arc::new(AlwaysFilter);
        reg.add(l.clone(), Scope::Global(filter.clone()), true);
        assert!(!reg.contains_standard_for_filter(filter.as_ref()));
        reg.add(l.clone(), Scope::Global(filter.clone()), false);
        assert!(reg.contains_standard_for_filter(filter.as_ref()));
    }

    #[tokio::test]
    async fn test_all_listener_plan_matches_every_event() {
        let reg = ListenerRegistry::new();
        let l = ListenerHandle::new(RecordingListener::new());
        reg.add(l.clone(), Scope::Global(Arc::new(AlwaysFilter)), false);
        let collected = reg.collect(&sample_event(Some(vec![9])), None);
        assert_eq!(collected.listeners.len(), 1);
        assert!(collected.listeners.contains(&l));
    }

    #[test]
    fn test_key_listener_plan_recomputes_and_stays_lock_free() {
        let reg = ListenerRegistry::new();
        let l = ListenerHandle::new(RecordingListener::new());
        reg.add(l.clone(), Scope::Key(vec![1]), false);
        reg.add(l.clone(), Scope::Key(vec![2]), false);
        reg.add(l.clone(), Scope::Key(vec![3]), false);

        let c = reg.collect(&sample_event(Some(vec![2])), None);
        assert_eq!(c.listeners, [l.clone()].into_iter().collect());

        let c = reg.collect(&sample_event(Some(vec![1])), None);
        assert_eq!(c.listeners, [l.clone()].into_iter().collect());

        // a different listener on a new key breaks the uniform key-listener shape
        let l2 = ListenerHandle::new(RecordingListener::new());
        reg.add(l2.clone(), Scope::Key(vec![4]), false);
        let c = reg.collect(&sample_event(Some(vec![4])), None);
        assert!(c.listeners.contains(&l2));
        assert!(!c.listeners.contains(&l));
    }

    #[test]
    fn test_transformed_event_skips_key_listeners() {
        let reg = ListenerRegistry::new();
        let key_listener = ListenerHandle::new(RecordingListener::new());
        let filter_listener = ListenerHandle::new(RecordingListener::new());
        reg.add(key_listener.clone(), Scope::Key(vec![1]), false);
        reg.add(filter_listener.clone(), Scope::Global(Arc::new(AlwaysFilter)), false);
        // two global-ish scopes forces NoOptimize (by_key + global both non-empty)
        let mut e = sample_event(Some(vec![1]));
        e.transform_state = TransformState::Transformed;
        let c = reg.collect(&e, None);
        assert!(c.listeners.contains(&filter_listener));
        assert!(!c.listeners.contains(&key_listener));
    }

    #[test]
    fn test_event_transformer_skips_nontransformable_events() {
        let reg = ListenerRegistry::new();
        #[derive(Debug)]
        struct TransformerFilter;
        impl Filter for TransformerFilter {
            fn filter_key(&self) -> FilterKey {
                FilterKey::Opaque(vec![7])
            }
            fn evaluate(&self, _event: &CacheEvent) -> bool {
                true
            }
            fn is_event_transformer(&self) -> bool {
                true
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
        let l = ListenerHandle::new(RecordingListener::new());
        let key_l = ListenerHandle::new(RecordingListener::new());
        reg.add(l.clone(), Scope::Global(Arc::new(TransformerFilter)), false);
        reg.add(key_l.clone(), Scope::Key(vec![1]), false);

        let mut e = sample_event(Some(vec![1]));
        e.transform_state = TransformState::NonTransformable;
        let c = reg.collect(&e, None);
        assert!(!c.listeners.contains(&l));
        assert!(c.listeners.contains(&key_l));

        e.transform_state = TransformState::Transformable;
        let c = reg.collect(&e, None);
        assert!(c.listeners.contains(&l));
    }

    #[test]
    fn test_explicit_filter_ids_path_only_considers_listed_filters() {
        let reg = ListenerRegistry::new();
        let matched = ListenerHandle::new(RecordingListener::new());
        let other = ListenerHandle::new(RecordingListener::new());
        let f1: Arc<dyn Filter> = Arc::new(KeySetFilter(FilterKey::Opaque(vec![1])));
        let f2: Arc<dyn Filter> = Arc::new(KeySetFilter(FilterKey::Opaque(vec![2])));
        reg.add(matched.clone(), Scope::Global(f1.clone()), false);
        reg.add(other.clone(), Scope::Global(f2.clone()), false);
        // force NoOptimize shape (two distinct global filters)
        let c = reg.collect(&sample_event(None), Some(&[f1]));
        assert!(c.listeners.contains(&matched));
        assert!(!c.listeners.contains(&other));
    }

    #[test]
    fn test_listener_kind_default_is_standard() {
        let l = RecordingListener::new();
        assert_eq!(l.kind(), ListenerKind::Standard);
    }
}
