//! Server-evaluable predicates used in queries and event subscriptions

use crate::CacheEvent;
use std::any::Any;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, RwLock};

/// Identity key for a filter, used by the Filter-ID Table's reverse lookup
/// and by the Listener Registry's `global` map key.
///
/// Two filter instances that would produce identical server-side
/// subscriptions MUST return equal `FilterKey`s so that registration stays
/// idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterKey {
    /// Matches every event ("always" / no filter).
    None,
    /// Opaque identity, usually a canonical serialized form of the filter.
    Opaque(Vec<u8>),
}

/// A server-evaluable predicate over cache entries/events.
///
/// Filters are used both in queries (`query`, `invoke_all`, `aggregate`)
/// and in event subscriptions (`listener_add(filter, ...)`).
pub trait Filter: Send + Sync + Debug {
    /// Identity used for de-duplication and map keys.
    fn filter_key(&self) -> FilterKey;

    /// Evaluate the filter against an event, client-side. Used only by the
    /// Listener Registry's `NoOptimize` slow path when an event arrives
    /// without an explicit `filter_ids` list attached.
    fn evaluate(&self, event: &CacheEvent) -> bool;

    /// An "event transformer" filter mutates events before delivery and
    /// therefore must not receive `NonTransformable` events.
    fn is_event_transformer(&self) -> bool {
        false
    }

    /// An "in-key-set" filter restricts to a known, bounded key set —
    /// relevant to the priming-listener protocol gate.
    fn is_key_set_filter(&self) -> bool {
        false
    }

    /// Downcast support for filters that carry limit/paging state.
    fn as_limit_filter(&self) -> Option<&LimitFilter> {
        None
    }

    /// Generic downcast escape hatch for filter composition.
    fn as_any(&self) -> &dyn Any;
}

/// A filter wrapping a bounded "window" over an ordered result set.
///
/// Carries the server-echoed pagination cursor (`bottom_anchor`,
/// `top_anchor`, `cookie`) so the Paged Query Engine can advance it across
/// round-trips without the caller losing track of the underlying filter
/// object (the same `Arc<LimitFilter>` is shared between the query engine
/// and any retained reference the caller holds).
#[derive(Debug)]
pub struct LimitFilter {
    inner: Arc<dyn Filter>,
    page_size: usize,
    bottom_anchor: RwLock<Option<Vec<u8>>>,
    top_anchor: RwLock<Option<Vec<u8>>>,
    cookie: RwLock<Option<Vec<u8>>>,
    /// Slot the typed façade can stash a boxed comparator into while the
    /// paging protocol runs at the binary layer, then reclaim afterward.
    comparator_slot: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl LimitFilter {
    pub fn new(inner: Arc<dyn Filter>, page_size: usize) -> Self {
        Self {
            inner,
            page_size,
            bottom_anchor: RwLock::new(None),
            top_anchor: RwLock::new(None),
            cookie: RwLock::new(None),
            comparator_slot: Mutex::new(None),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn inner(&self) -> &Arc<dyn Filter> {
        &self.inner
    }

    pub fn cookie(&self) -> Option<Vec<u8>> {
        self.cookie.read().unwrap().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.cookie.read().unwrap().is_none()
    }

    /// Advance the anchors/cookie from a partial response.
    pub fn advance(&self, bottom: Option<Vec<u8>>, top: Option<Vec<u8>>, cookie: Option<Vec<u8>>) {
        *self.bottom_anchor.write().unwrap() = bottom;
        *self.top_anchor.write().unwrap() = top;
        *self.cookie.write().unwrap() = cookie;
    }

    pub fn bottom_anchor(&self) -> Option<Vec<u8>> {
        self.bottom_anchor.read().unwrap().clone()
    }

    pub fn top_anchor(&self) -> Option<Vec<u8>> {
        self.top_anchor.read().unwrap().clone()
    }

    /// Attach a typed comparator for the duration of a sorted page
    /// extraction, returning whatever was there before (normally `None`).
    pub fn attach_comparator(&self, comparator: Box<dyn Any + Send + Sync>) -> Option<Box<dyn Any + Send + Sync>> {
        self.comparator_slot.lock().unwrap().replace(comparator)
    }

    /// Restore (remove) the comparator previously attached.
    pub fn take_comparator(&self) -> Option<Box<dyn Any + Send + Sync>> {
        self.comparator_slot.lock().unwrap().take()
    }
}

impl Filter for LimitFilter {
    fn filter_key(&self) -> FilterKey {
        self.inner.filter_key()
    }

    fn evaluate(&self, event: &CacheEvent) -> bool {
        self.inner.evaluate(event)
    }

    fn is_event_transformer(&self) -> bool {
        self.inner.is_event_transformer()
    }

    fn is_key_set_filter(&self) -> bool {
        self.inner.is_key_set_filter()
    }

    fn as_limit_filter(&self) -> Option<&LimitFilter> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The always-true filter, used to represent "no filter" / "matches all"
/// when a concrete `Filter` object is required (e.g. `listener_add(None)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFilter;

impl Filter for AlwaysFilter {
    fn filter_key(&self) -> FilterKey {
        FilterKey::None
    }

    fn evaluate(&self, _event: &CacheEvent) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, TransformState};

    fn sample_event() -> CacheEvent {
        CacheEvent {
            source: "c".into(),
            kind: EventKind::Inserted,
            key: Some(vec![1]),
            old_value: None,
            new_value: Some(vec![2]),
            is_synthetic: false,
            transform_state: TransformState::Transformable,
            is_priming: false,
            filters: None,
            filter_ids: None,
        }
    }

    #[test]
    fn test_always_filter_matches_everything() {
        let f = AlwaysFilter;
        assert!(f.evaluate(&sample_event()));
        assert_eq!(f.filter_key(), FilterKey::None);
    }

    #[test]
    fn test_limit_filter_advance_and_terminal() {
        let lf = LimitFilter::new(Arc::new(AlwaysFilter), 100);
        assert!(lf.is_terminal());
        lf.advance(Some(vec![1]), Some(vec![2]), Some(vec![9]));
        assert!(!lf.is_terminal());
        assert_eq!(lf.cookie(), Some(vec![9]));
        lf.advance(None, None, None);
        assert!(lf.is_terminal());
    }

    #[test]
    fn test_limit_filter_comparator_attach_restore() {
        let lf = LimitFilter::new(Arc::new(AlwaysFilter), 10);
        assert!(lf.attach_comparator(Box::new(42i32)).is_none());
        let restored = lf.take_comparator().unwrap();
        assert_eq!(*restored.downcast::<i32>().unwrap(), 42);
        assert!(lf.take_comparator().is_none());
    }
}
