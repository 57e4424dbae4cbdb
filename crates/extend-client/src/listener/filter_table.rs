//! Filter-ID Table: a dense-from-1 bidirectional map between
//! server-subscription ids and filter objects.

use extend_core::{Filter, FilterKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    slots: Vec<Option<Arc<dyn Filter>>>,
    by_key: HashMap<FilterKey, i64>,
}

/// Thread-safe, append-mostly sparse array from filter id to filter.
///
/// Mutation is expected to happen under the owning `ListenerRegistry`'s
/// lock so that `{register, add}` and `{remove, unregister}` stay atomic
/// pairs — this type's own lock only protects its internal slot vector.
pub struct FilterTable {
    inner: Mutex<Inner>,
}

impl FilterTable {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// Register `filter`, returning its id. If an equivalent filter (same
    /// `FilterKey`) is already registered, its existing id is returned
    /// instead of allocating a new slot.
    pub fn register(&self, filter: Arc<dyn Filter>) -> i64 {
        let mut inner = self.inner.lock();
        let key = filter.filter_key();
        if let Some(&id) = inner.by_key.get(&key) {
            return id;
        }
        let slot = inner.slots.iter().position(|s| s.is_none());
        let id = match slot {
            Some(idx) => {
                inner.slots[idx] = Some(filter);
                idx as i64 + 1
            }
            None => {
                inner.slots.push(Some(filter));
                inner.slots.len() as i64
            }
        };
        inner.by_key.insert(key, id);
        id
    }

    pub fn lookup(&self, id: i64) -> Option<Arc<dyn Filter>> {
        if id < 1 {
            return None;
        }
        let inner = self.inner.lock();
        inner.slots.get((id - 1) as usize).cloned().flatten()
    }

    /// Free the slot for `id`. Ids are not reused eagerly, but an emptied
    /// slot is fair game for a future `register`.
    pub fn unregister(&self, id: i64) {
        if id < 1 {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut((id - 1) as usize) {
            if let Some(filter) = slot.take() {
                inner.by_key.remove(&filter.filter_key());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.iter().all(Option::is_none)
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_core::AlwaysFilter;

    #[test]
    fn test_register_allocates_from_one() {
        let table = FilterTable::new();
        let id1 = table.register(Arc::new(AlwaysFilter));
        assert_eq!(id1, 1);
    }

    #[test]
    fn test_register_dedupes_equivalent_filter() {
        let table = FilterTable::new();
        let id1 = table.register(Arc::new(AlwaysFilter));
        let id2 = table.register(Arc::new(AlwaysFilter));
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_unregister_frees_slot_for_reuse() {
        let table = FilterTable::new();
        let id1 = table.register(Arc::new(AlwaysFilter));
        table.unregister(id1);
        assert!(table.lookup(id1).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_unknown_id() {
        let table = FilterTable::new();
        assert!(table.lookup(42).is_none());
        assert!(table.lookup(0).is_none());
    }
}
