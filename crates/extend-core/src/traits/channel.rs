//! The transport collaborator: a multiplexed request/response channel
//!
//! Everything below the `Channel` boundary — framing, TLS, socket
//! reconnects, name-service bootstrap — is out of scope for this crate.
//! It only consumes this trait and the `UnsolicitedReceiver` callback it
//! is constructed with.

use crate::{CacheRequest, CacheResponse, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A multiplexed logical stream over a connection: one per service, one
/// per named cache.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Blocking (from the caller's perspective) request/response.
    async fn request(&self, msg: CacheRequest) -> Result<CacheResponse>;

    /// Send a request without waiting inline; used for partial-response
    /// streams (paged queries) so the caller can interleave further
    /// protocol steps if needed. Default implementation simply awaits
    /// `request` eagerly, which is sufficient for the mock transport and
    /// adequate for all but the most latency-sensitive deployments.
    async fn send(&self, msg: CacheRequest) -> Result<PendingResponse> {
        let resp = self.request(msg).await;
        Ok(PendingResponse::ready(resp))
    }

    /// Whether the channel is currently open. `false` after a
    /// `ChannelClosed` observation or explicit `close`.
    fn is_open(&self) -> bool;

    /// Close the channel. Idempotent.
    async fn close(&self);
}

/// A response that may already be available or still in flight.
pub struct PendingResponse {
    result: Option<Result<CacheResponse>>,
    receiver: Option<tokio::sync::oneshot::Receiver<Result<CacheResponse>>>,
}

impl PendingResponse {
    pub fn ready(result: Result<CacheResponse>) -> Self {
        Self {
            result: Some(result),
            receiver: None,
        }
    }

    pub fn pending(receiver: tokio::sync::oneshot::Receiver<Result<CacheResponse>>) -> Self {
        Self {
            result: None,
            receiver: Some(receiver),
        }
    }

    pub async fn wait_for_response(self) -> Result<CacheResponse> {
        if let Some(result) = self.result {
            return result;
        }
        match self.receiver {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(crate::ExtendError::ChannelClosed("response channel dropped".into()))),
            None => Err(crate::ExtendError::Internal("PendingResponse has neither result nor receiver".into())),
        }
    }
}

/// Callback interface a `Channel` drives for unsolicited traffic: events
/// pushed by the proxy without a matching outstanding request, and
/// notification that the channel has closed.
#[async_trait]
pub trait UnsolicitedReceiver: Send + Sync + 'static {
    async fn on_message(&self, event: crate::CacheEvent);
    async fn on_channel_closed(&self);
}

/// Opens channels against a connection to a cache-service proxy.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Open a channel scoped to `service_name`, wiring unsolicited traffic
    /// to `receiver`. `principal` threads through an authenticated
    /// identity for deployments that scope caches per-principal.
    async fn open_channel(
        &self,
        service_name: &str,
        receiver: Arc<dyn UnsolicitedReceiver>,
        principal: Option<&str>,
    ) -> Result<Arc<dyn Channel>>;
}
