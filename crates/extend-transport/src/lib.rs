//! extend-transport: transport collaborators for the Extend gateway client
//!
//! The production transport — socket framing, TLS, name-service bootstrap —
//! is out of scope; the cluster-side proxy is treated as an external
//! collaborator. This crate ships the in-process mock transport the rest
//! of the workspace tests against.

pub mod mock;

pub use mock::{MockChannel, MockCluster, MockConnection};
