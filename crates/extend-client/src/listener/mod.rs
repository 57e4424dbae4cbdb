//! Listener bookkeeping: the Filter-ID Table (B), the Listener Registry
//! (A), and the Event Dispatcher (I).

mod dispatcher;
mod filter_table;
mod registry;

pub use dispatcher::{DispatchMode, EventDispatcher, RunnableCacheEvent};
pub use filter_table::FilterTable;
pub use registry::{Collected, ListenerRegistry, Scope};
