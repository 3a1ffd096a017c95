//! Live Grid View Engine
//!
//! Keeps a client-side materialized view of a pub/sub subscription's result
//! set, keyed by record identity, for a live market data grid:
//! - Row identity from the bus-assigned SOW key
//! - Snapshot buffering with a single atomic swap point
//! - Field-wise merge of live updates, out-of-focus removal
//! - Subscription lifecycle with handle fencing across filter changes
//! - A tokio driver publishing copy-on-write snapshots to readers
//! - An in-memory loopback bus for tests and demos
//!
//! # Architecture
//!
//! ```text
//!   Transport (InMemoryBus / network client)
//!        │  (handle, Message)
//!    ┌───▼────────┐
//!    │  Driver    │  ← single mpsc queue: deliveries, connection, control
//!    └───┬────────┘
//!        │
//!    ┌───▼────────┐
//!    │  Session   │  ← handle fencing, lifecycle, Message → Event
//!    └───┬────────┘
//!        │
//!    ┌───▼────────┐
//!    │   View     │  ← pending snapshot │ confirmed Arc<ViewState>
//!    └───┬────────┘
//!        │ watch
//!   Renderers (Arc<SessionSnapshot>)
//! ```

pub mod bus;
pub mod driver;
pub mod events;
pub mod filter;
pub mod identity;
pub mod metrics;
pub mod options;
pub mod session;
pub mod transport;
pub mod view;

pub use bus::{BusConfig, InMemoryBus};
pub use driver::{DriverError, DriverHandle, SessionDriver, SessionInput, SessionSnapshot, ViewReader};
pub use events::{Command, Event, Message};
pub use identity::key_of;
pub use options::SubscriptionOptions;
pub use session::{Dispatch, SessionConfig, SessionState, SubscriptionSession};
pub use transport::{ConnectionState, ListenerId, SubscriptionCriteria, SubscriptionHandle, Transport};
pub use view::{MaterializedView, ViewState};

// Library version
pub const ENGINE_VERSION: &str = "0.1.0";
