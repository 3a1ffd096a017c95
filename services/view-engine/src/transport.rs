//! Transport boundary
//!
//! The engine never talks to a network itself. A `Transport` accepts
//! subscriptions and pushes `Message`s back through a callback tagged with
//! the subscription handle, so the session can tell current deliveries from
//! ones belonging to a superseded subscription.

use std::fmt;
use std::sync::Arc;

use grid_types::errors::TransportError;

use crate::events::Message;
use crate::options::SubscriptionOptions;

/// Opaque subscription handle issued by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Transport-reported connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    pub topic: String,
    /// Content filter expression, e.g. `/symbol = 'IBM' OR /bid > 500`.
    pub filter: Option<String>,
    /// Ordering for the initial snapshot, e.g. `/bid DESC`.
    pub order_by: Option<String>,
    pub options: SubscriptionOptions,
}

impl SubscriptionCriteria {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            filter: None,
            order_by: None,
            options: SubscriptionOptions::default(),
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = normalize_filter(filter);
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Treat a blank filter the same as no filter.
pub fn normalize_filter(filter: Option<String>) -> Option<String> {
    filter
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
}

/// Receives every message for a subscription.
pub type DeliveryCallback = Arc<dyn Fn(SubscriptionHandle, Message) + Send + Sync>;

/// Receives connection state transitions.
pub type ConnectionCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Registration id for a connection listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// A pub/sub transport the session subscribes through.
///
/// Implementations must deliver messages for one handle in order. Callbacks
/// may be invoked before `subscribe` returns (the initial snapshot), so they
/// must only enqueue and never call back into the transport.
pub trait Transport: Send + Sync {
    /// Open a subscription. Every message it produces goes to `on_message`.
    fn subscribe(
        &self,
        criteria: &SubscriptionCriteria,
        on_message: DeliveryCallback,
    ) -> Result<SubscriptionHandle, TransportError>;

    /// Close a subscription. Unknown or already-closed handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Register a listener for connection state changes.
    fn on_connection_change(&self, listener: ConnectionCallback) -> ListenerId;

    /// Deregister a listener. Unknown ids are ignored.
    fn remove_connection_listener(&self, id: ListenerId);

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;
}
