//! extend-client: client-side core of an Extend gateway client to a remote
//! clustered key/value cache fabric.
//!
//! This crate assembles the collaborators `extend-core` only defines the
//! contracts for: the Filter-ID Table and Listener Registry (bookkeeping
//! for event subscriptions), the Event Dispatcher (ordered async delivery),
//! the Converter Pair (object<->binary conversion with partition-affinity
//! decoration), the Paged Query Engine, the Binary Cache Client, the typed
//! `NamedCache` façade over it, the Remote Cache Service (channel
//! lifecycle), and the Safe Wrapper (transparent reconnect).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use extend_client::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(connection: Arc<dyn Connection>) -> extend_core::Result<()> {
//! let dispatcher = Arc::new(EventDispatcher::new(DispatchMode::Permissive, Arc::new(NoopMetrics)));
//! let safe = SafeService::new(connection, "proxy", dispatcher, Arc::new(NoopMetrics), ProxyProtocolVersion(6));
//! safe.start(None).await?;
//!
//! let cache: SafeCache<String, i32, JsonSerializer> =
//!     SafeCache::new(safe, "numbers", None, JsonSerializer, false);
//! cache.put(&"answer".to_string(), &42, 0).await?;
//! # Ok(())
//! # }
//! ```

pub mod binary_cache;
pub mod convert;
pub mod listener;
pub mod named_cache;
pub mod query;
pub mod safe;
pub mod service;

pub use binary_cache::{BinaryCache, ListenerTarget};
pub use listener::{Collected, DispatchMode, EventDispatcher, FilterTable, ListenerRegistry, RunnableCacheEvent, Scope};
pub use named_cache::{NamedCache, TypedCacheEvent, TypedMapListener};
pub use query::{run_query, Advancer};
pub use safe::{SafeCache, SafeService};
pub use service::CacheService;

pub use extend_core::*;

/// Convenience re-exports for the common construction path.
pub mod prelude {
    pub use crate::{
        BinaryCache, CacheService, DispatchMode, EventDispatcher, ListenerTarget, NamedCache,
        SafeCache, SafeService, TypedCacheEvent, TypedMapListener,
    };
    pub use extend_core::{
        AlwaysFilter, CacheEvent, ClientConfig, Connection, ExtendError, Filter, JsonSerializer,
        LimitFilter, ListenerKind, MapListener, NoopMetrics, ProxyProtocolVersion, Result, Serializer,
    };

    #[cfg(feature = "msgpack")]
    pub use extend_core::MsgPackSerializer;

    #[cfg(feature = "bincode")]
    pub use extend_core::BincodeSerializer;
}
