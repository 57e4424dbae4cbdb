//! An in-process mock of the Extend transport, for tests and examples.
//!
//! This is explicitly not a production transport — the socket/TLS/
//! name-service layer is out of scope for this workspace. `MockConnection`
//! simulates just enough cluster-side behavior — entry storage, key/filter
//! subscriptions, paged queries — for the rest of the workspace's test
//! suites to exercise real `Channel`/`Connection` call patterns without a
//! network.

mod channel;
mod state;

pub use channel::{MockChannel, MockConnection};
pub use state::MockCluster;
