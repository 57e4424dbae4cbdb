//! extend-core: wire-level traits and types for the Extend gateway client
//!
//! This crate has no I/O of its own. It defines the contracts the rest of
//! the workspace builds on: the `Channel`/`Connection` transport
//! collaborators, the `Serializer` collaborator, `Filter` and listener
//! traits, the cache-operation message kinds, and the error taxonomy.

mod error;
mod traits;
mod types;

pub use error::{ExtendError, Result};
pub use traits::*;
pub use types::*;
