//! Core wire/data types

mod config;
mod event;
mod message;
mod protocol;

pub use config::{ClientConfig, InitiatorConfig, NameServiceBootstrap, SocketAddress, TcpParameters};
pub use event::{CacheEvent, EventKind, TransformState};
pub use message::{CacheRequest, CacheResponse, FailurePayload, LimitAdvance, MessageKind, QueryRow, TtlSpec};
pub use protocol::{Feature, ProxyProtocolVersion};
