//! Listener traits and identity
//!
//! Listener dispatch behavior (standard/async, synchronous, priming) is
//! modeled as an explicit `ListenerKind` attached to each registration,
//! rather than as runtime type tests against marker traits.

use crate::CacheEvent;
use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Dispatch classification for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Delivered asynchronously via the Event Dispatcher queue.
    Standard,
    /// Delivered inline on the event-reception thread; exceptions are
    /// logged but must not affect delivery to other listeners.
    Synchronous,
    /// Synchronous, and additionally expects a synthetic "current value"
    /// event to be generated by the server on registration.
    Priming,
}

impl ListenerKind {
    /// Priming and synchronous listeners both bypass the dispatch queue.
    pub fn dispatches_inline(&self) -> bool {
        matches!(self, ListenerKind::Synchronous | ListenerKind::Priming)
    }
}

/// A listener for `CacheEvent`s.
#[async_trait]
pub trait MapListener: Send + Sync + 'static {
    /// Handle one event. For `Standard` listeners this runs on the Event
    /// Dispatcher's worker task; for `Synchronous`/`Priming` listeners this
    /// runs inline on the event-reception task.
    async fn entry_event(&self, event: CacheEvent);

    /// Dispatch classification; defaults to `Standard`.
    fn kind(&self) -> ListenerKind {
        ListenerKind::Standard
    }
}

/// A listener fired when a `NamedCache`'s underlying channel closes.
///
/// Never forwarded to the server — purely a local notification mechanism.
/// Fired synchronously, exactly once per closure, as a synthetic
/// `Deleted` event with no key.
#[async_trait]
pub trait DeactivationListener: Send + Sync + 'static {
    async fn on_deactivated(&self, event: CacheEvent);
}

/// Reference-identity wrapper so listeners can be stored in a `HashSet`
/// keyed by instance identity (two distinct listener instances with
/// otherwise-identical behavior are not the same registration).
#[derive(Clone)]
pub struct ListenerHandle(pub Arc<dyn MapListener>);

impl ListenerHandle {
    pub fn new(listener: Arc<dyn MapListener>) -> Self {
        Self(listener)
    }
}

impl PartialEq for ListenerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ListenerHandle {}

impl Hash for ListenerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ListenerHandle({:p})", Arc::as_ptr(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(AtomicUsize);

    #[async_trait]
    impl MapListener for CountingListener {
        async fn entry_event(&self, _event: CacheEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_handle_identity_not_structural() {
        let a: Arc<dyn MapListener> = Arc::new(CountingListener(AtomicUsize::new(0)));
        let b: Arc<dyn MapListener> = Arc::new(CountingListener(AtomicUsize::new(0)));

        let ha = ListenerHandle::new(a.clone());
        let ha2 = ListenerHandle::new(a);
        let hb = ListenerHandle::new(b);

        assert_eq!(ha, ha2);
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_dispatches_inline() {
        assert!(!ListenerKind::Standard.dispatches_inline());
        assert!(ListenerKind::Synchronous.dispatches_inline());
        assert!(ListenerKind::Priming.dispatches_inline());
    }
}
