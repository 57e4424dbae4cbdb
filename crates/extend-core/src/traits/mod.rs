//! Core traits: the collaborators the client consumes and the contracts it
//! exposes to the rest of the workspace.

mod channel;
mod filter;
mod key;
mod listener;
mod metrics;
mod serializer;

pub use channel::{Channel, Connection, PendingResponse, UnsolicitedReceiver};
pub use filter::{AlwaysFilter, Filter, FilterKey, LimitFilter};
pub use key::{AssociatedKey, KeyAssociation};
pub use listener::{DeactivationListener, ListenerHandle, ListenerKind, MapListener};
pub use metrics::{ClientMetrics, ClientOperation, NoopMetrics, ReconnectReason};
pub use serializer::{JsonSerializer, Serializer};

#[cfg(feature = "msgpack")]
pub use serializer::MsgPackSerializer;

#[cfg(feature = "bincode")]
pub use serializer::BincodeSerializer;

#[cfg(feature = "tracing")]
mod tracing;
#[cfg(feature = "tracing")]
pub use tracing::TracingMetrics;
