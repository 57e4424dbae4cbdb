//! In-process `Channel`/`Connection` test double

use super::state::MockCluster;
use extend_core::{
    CacheRequest, CacheResponse, Channel, Connection, ExtendError, ProxyProtocolVersion, Result,
    UnsolicitedReceiver,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A channel backed by an in-process [`MockCluster`] instead of a socket.
///
/// Request handling is synchronous and immediate; any event the request
/// provokes is pushed to the channel's `UnsolicitedReceiver` on a spawned
/// task, mirroring the real transport's separation between the calling
/// thread's request/response round-trip and the service's own
/// event-dispatcher thread.
pub struct MockChannel {
    cluster: Arc<MockCluster>,
    receiver: Arc<dyn UnsolicitedReceiver>,
    open: AtomicBool,
}

impl MockChannel {
    fn new(cluster: Arc<MockCluster>, receiver: Arc<dyn UnsolicitedReceiver>) -> Arc<Self> {
        Arc::new(Self { cluster, receiver, open: AtomicBool::new(true) })
    }

    /// Test hook: force this channel closed and notify the receiver,
    /// simulating an unsolicited disconnect rather than an explicit
    /// `close()` call.
    pub async fn simulate_disconnect(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.receiver.on_channel_closed().await;
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn request(&self, msg: CacheRequest) -> Result<CacheResponse> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ExtendError::ChannelClosed("mock channel is closed".into()));
        }
        let (result, pushed) = self.cluster.handle(msg);
        if let Some(pushed) = pushed {
            self.receiver.on_message(pushed.event).await;
        }
        result
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.receiver.on_channel_closed().await;
        }
    }
}

/// A `Connection` that hands out [`MockChannel`]s sharing one
/// [`MockCluster`], so multiple channels opened against the same
/// connection observe each other's puts/removes — the same way multiple
/// real channels multiplexed over one socket would.
pub struct MockConnection {
    cluster: Arc<MockCluster>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::with_protocol_version(ProxyProtocolVersion(6))
    }

    pub fn with_protocol_version(version: ProxyProtocolVersion) -> Self {
        Self { cluster: MockCluster::new(version) }
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn open_channel(
        &self,
        _service_name: &str,
        receiver: Arc<dyn UnsolicitedReceiver>,
        _principal: Option<&str>,
    ) -> Result<Arc<dyn Channel>> {
        Ok(MockChannel::new(self.cluster.clone(), receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_core::{CacheEvent, EventKind};
    use std::sync::Mutex as StdMutex;

    struct RecordingReceiver {
        events: StdMutex<Vec<CacheEvent>>,
        closed: AtomicBool,
    }

    impl RecordingReceiver {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: StdMutex::new(Vec::new()), closed: AtomicBool::new(false) })
        }
    }

    #[async_trait]
    impl UnsolicitedReceiver for RecordingReceiver {
        async fn on_message(&self, event: CacheEvent) {
            self.events.lock().unwrap().push(event);
        }

        async fn on_channel_closed(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let conn = MockConnection::new();
        let receiver = RecordingReceiver::new();
        let channel = conn.open_channel("proxy", receiver, None).await.unwrap();

        let resp = channel
            .request(CacheRequest::Put {
                cache: "c".into(),
                key: vec![1],
                value: vec![9],
                ttl: extend_core::TtlSpec::Default,
                return_old: false,
            })
            .await
            .unwrap();
        assert!(matches!(resp, CacheResponse::Unit));

        let resp = channel.request(CacheRequest::Get { cache: "c".into(), key: vec![1] }).await.unwrap();
        assert_eq!(resp_value(resp), Some(vec![9]));
    }

    #[tokio::test]
    async fn test_key_listener_receives_put_event() {
        let conn = MockConnection::new();
        let receiver = RecordingReceiver::new();
        let channel = conn.open_channel("proxy", receiver.clone(), None).await.unwrap();

        channel
            .request(CacheRequest::ListenerKey {
                cache: "c".into(),
                key: vec![1],
                add: true,
                lite: false,
                priming: false,
            })
            .await
            .unwrap();

        channel
            .request(CacheRequest::Put {
                cache: "c".into(),
                key: vec![1],
                value: vec![2],
                ttl: extend_core::TtlSpec::Default,
                return_old: false,
            })
            .await
            .unwrap();

        let events = receiver.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Inserted);
        assert_eq!(events[0].key, Some(vec![1]));
    }

    #[tokio::test]
    async fn test_close_notifies_receiver() {
        let conn = MockConnection::new();
        let receiver = RecordingReceiver::new();
        let channel = conn.open_channel("proxy", receiver.clone(), None).await.unwrap();
        channel.close().await;
        assert!(!channel.is_open());
        assert!(receiver.closed.load(Ordering::SeqCst));

        let err = channel.request(CacheRequest::Size { cache: "c".into() }).await.unwrap_err();
        assert!(err.is_channel_loss());
    }

    fn resp_value(resp: CacheResponse) -> Option<Vec<u8>> {
        match resp {
            CacheResponse::Value(v) => v,
            other => panic!("expected Value, got {other:?}"),
        }
    }
}
