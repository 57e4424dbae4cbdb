//! Event Dispatcher: a single bounded queue consumed by one worker, so
//! ordering within a listener is FIFO. Synchronous and
//! priming listeners bypass this queue entirely and run inline on the
//! channel-receiving thread (see `binary_cache::BinaryCache::on_message`).

use super::registry::ListenerRegistry;
use extend_core::{CacheEvent, ClientMetrics, Filter, ListenerHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// One unit of dispatch work: an already-resolved listener set, a single
/// listener, or a deferred
/// resolution against the registry (used when the listener set should be
/// recomputed at dispatch time rather than at enqueue time).
pub enum RunnableCacheEvent {
    ToSet { event: CacheEvent, listeners: Vec<ListenerHandle> },
    ToOne { event: CacheEvent, listener: ListenerHandle },
    ToRegistry {
        event: CacheEvent,
        registry: Arc<ListenerRegistry>,
        explicit_filters: Option<Vec<Arc<dyn Filter>>>,
    },
}

enum Task {
    Run(RunnableCacheEvent),
    Barrier(oneshot::Sender<()>),
}

/// Dispatch mode for exceptions a listener task panics with. `Strict`
/// propagates (resumes the panic on the caller that next calls `drain`);
/// `Permissive` logs and continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Strict,
    Permissive,
}

/// Capacity of the dispatcher's single work queue. Events beyond this are
/// dropped (and logged) rather than buffered without bound.
const QUEUE_CAPACITY: usize = 4096;

pub struct EventDispatcher {
    sender: mpsc::Sender<Task>,
    worker: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl EventDispatcher {
    pub fn new(mode: DispatchMode, metrics: Arc<dyn ClientMetrics>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Task>(QUEUE_CAPACITY);

        let worker = tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                match task {
                    Task::Run(runnable) => Self::run(runnable, mode, metrics.as_ref()).await,
                    Task::Barrier(tx) => {
                        let _ = tx.send(());
                    }
                }
            }
        });

        Self { sender, worker: Arc::new(tokio::sync::Mutex::new(Some(worker))) }
    }

    /// Non-blocking: the caller (the channel's receive loop) must never
    /// stall on a slow listener, so a full queue drops the event rather
    /// than applying backpressure. A closed receiver (worker already shut
    /// down) is handled the same way.
    pub fn enqueue(&self, runnable: RunnableCacheEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(Task::Run(runnable)) {
            tracing::warn!(target: "extend_client", "event dispatcher queue full, dropping event");
        }
    }

    /// Block until every event enqueued before this call has been fully
    /// dispatched.
    pub async fn drain(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Task::Barrier(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn run(runnable: RunnableCacheEvent, mode: DispatchMode, metrics: &dyn ClientMetrics) {
        let (event, listeners) = match runnable {
            RunnableCacheEvent::ToSet { event, listeners } => (event, listeners),
            RunnableCacheEvent::ToOne { event, listener } => (event, vec![listener]),
            RunnableCacheEvent::ToRegistry { event, registry, explicit_filters } => {
                let collected = registry.collect(&event, explicit_filters.as_deref());
                (event, collected.listeners.into_iter().collect())
            }
        };

        metrics.record_event_dispatch(listeners.len());

        for listener in listeners {
            let ev = event.clone();
            let join = tokio::spawn(async move {
                listener.0.entry_event(ev).await;
            });
            match join.await {
                Ok(()) => {}
                Err(panicked) => match mode {
                    DispatchMode::Permissive => {
                        tracing::error!(target: "extend_client", "listener panicked during event dispatch: {panicked}");
                    }
                    DispatchMode::Strict => std::panic::resume_unwind(panicked.into_panic()),
                },
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.worker.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_core::{EventKind, MapListener, NoopMetrics, TransformState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(Arc<AtomicUsize>);

    #[async_trait]
    impl MapListener for CountingListener {
        async fn entry_event(&self, _event: CacheEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_event() -> CacheEvent {
        CacheEvent {
            source: "c".into(),
            kind: EventKind::Inserted,
            key: Some(vec![1]),
            old_value: None,
            new_value: None,
            is_synthetic: false,
            transform_state: TransformState::Transformable,
            is_priming: false,
            filters: None,
            filter_ids: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_and_drain() {
        let dispatcher = EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics));
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = ListenerHandle::new(Arc::new(CountingListener(counter.clone())));

        dispatcher.enqueue(RunnableCacheEvent::ToOne { event: sample_event(), listener });
        dispatcher.drain().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fifo_ordering_within_a_listener() {
        let dispatcher = EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct OrderedListener(Arc<std::sync::Mutex<Vec<u8>>>, u8);
        #[async_trait]
        impl MapListener for OrderedListener {
            async fn entry_event(&self, _event: CacheEvent) {
                self.0.lock().unwrap().push(self.1);
            }
        }

        let listener = ListenerHandle::new(Arc::new(OrderedListener(order.clone(), 0)));
        for _ in 0..5 {
            dispatcher.enqueue(RunnableCacheEvent::ToOne { event: sample_event(), listener: listener.clone() });
        }
        dispatcher.drain().await;
        assert_eq!(order.lock().unwrap().len(), 5);
    }
}
