//! Subscription session
//!
//! Binds one subscription criteria tuple to one `MaterializedView` and owns
//! the subscription lifecycle:
//!
//! ```text
//!  Idle ──start──► Starting ──snapshot end──► Active
//!   ▲                 ▲                         │ ▲
//!   │ stop            └────────restart──────────┤ │ Connected (auto)
//!   │                                           ▼ │
//!   └──────────────── stop ─────────────── Disconnected
//! ```
//!
//! Every delivery carries the handle of the subscription that produced it.
//! Only deliveries for the active handle reach the view; anything else is
//! a leftover from a superseded subscription and is discarded.

use std::sync::Arc;
use std::time::Instant;

use grid_types::errors::TransportError;
use tracing::{debug, info, warn};

use crate::events::{Event, Message};
use crate::metrics::SessionMetrics;
use crate::options::SubscriptionOptions;
use crate::transport::{
    normalize_filter, ConnectionState, DeliveryCallback, SubscriptionCriteria,
    SubscriptionHandle, Transport,
};
use crate::view::{MaterializedView, ViewState};

/// Default topic for the market data grid.
pub const DEFAULT_TOPIC: &str = "market_data";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// Subscribed, initial snapshot not yet complete.
    Starting,
    Active,
    Disconnected,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub topic: String,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub options: SubscriptionOptions,
    /// Re-issue `start` when the transport reconnects.
    pub auto_resubscribe: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            filter: None,
            order_by: None,
            options: SubscriptionOptions::default(),
            auto_resubscribe: true,
        }
    }
}

impl SessionConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = normalize_filter(Some(filter.into()));
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

    pub fn with_auto_resubscribe(mut self, enabled: bool) -> Self {
        self.auto_resubscribe = enabled;
        self
    }

    /// Criteria for the initial subscription.
    pub fn criteria(&self) -> SubscriptionCriteria {
        let mut criteria = SubscriptionCriteria::new(self.topic.clone())
            .with_filter(self.filter.clone())
            .with_options(self.options.clone());
        criteria.order_by = self.order_by.clone();
        criteria
    }
}

/// Outcome of dispatching one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    /// Handle did not match the active subscription.
    Fenced,
    /// Unrecognised command.
    Ignored,
    /// Malformed identity or out-of-order protocol event.
    Dropped,
}

/// One subscription bound to one materialized view.
pub struct SubscriptionSession {
    transport: Arc<dyn Transport>,
    sink: DeliveryCallback,
    criteria: SubscriptionCriteria,
    auto_resubscribe: bool,
    view: MaterializedView,
    state: SessionState,
    active: Option<SubscriptionHandle>,
    connection: ConnectionState,
    metrics: Arc<SessionMetrics>,
}

impl SubscriptionSession {
    /// Create an idle session. Transport deliveries go to `sink`, which is
    /// expected to queue them for `on_message`.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig, sink: DeliveryCallback) -> Self {
        let connection = transport.connection_state();
        Self {
            transport,
            sink,
            criteria: config.criteria(),
            auto_resubscribe: config.auto_resubscribe,
            view: MaterializedView::new(),
            state: SessionState::Idle,
            active: None,
            connection,
            metrics: Arc::new(SessionMetrics::new()),
        }
    }

    /// Subscribe with `criteria`, replacing any current subscription.
    ///
    /// On transport failure the session is left `Disconnected` with an
    /// empty view; the caller may retry.
    pub fn start(&mut self, criteria: SubscriptionCriteria) -> Result<SubscriptionHandle, TransportError> {
        if let Some(old) = self.active.take() {
            self.transport.unsubscribe(old);
            self.view.clear();
        }
        self.criteria = criteria;
        self.state = SessionState::Starting;

        match self.transport.subscribe(&self.criteria, Arc::clone(&self.sink)) {
            Ok(handle) => {
                self.metrics.record_subscribe(true);
                self.active = Some(handle);
                info!(
                    %handle,
                    topic = %self.criteria.topic,
                    filter = self.criteria.filter.as_deref().unwrap_or(""),
                    "Subscription started"
                );
                Ok(handle)
            }
            Err(e) => {
                self.metrics.record_subscribe(false);
                self.state = SessionState::Disconnected;
                warn!(topic = %self.criteria.topic, error = %e, "Subscribe failed");
                Err(e)
            }
        }
    }

    /// Re-subscribe with a new filter.
    ///
    /// Returns `Ok(None)` without touching the transport when the filter is
    /// unchanged and a subscription is active. Otherwise the current
    /// subscription is closed, the view cleared, and the new handle returned.
    pub fn restart(&mut self, filter: Option<String>) -> Result<Option<SubscriptionHandle>, TransportError> {
        let filter = normalize_filter(filter);
        if self.active.is_some() && filter == self.criteria.filter {
            debug!("Filter unchanged, restart skipped");
            return Ok(None);
        }

        self.metrics.record_restart();
        if let Some(old) = self.active.take() {
            self.transport.unsubscribe(old);
            debug!(handle = %old, "Superseded subscription closed");
        }
        self.view.clear();

        let mut criteria = self.criteria.clone();
        criteria.filter = filter;
        self.start(criteria).map(Some)
    }

    /// Close the subscription and return to `Idle`. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.active.take() {
            self.transport.unsubscribe(handle);
            info!(%handle, "Subscription stopped");
        }
        self.view.clear();
        self.state = SessionState::Idle;
    }

    /// Dispatch a raw transport delivery.
    pub fn on_message(&mut self, handle: SubscriptionHandle, message: Message) -> Dispatch {
        if !self.is_current(handle) {
            return Dispatch::Fenced;
        }

        match Event::classify(&message) {
            Ok(Some(event)) => self.apply(event),
            Ok(None) => {
                self.metrics.record_unknown();
                debug!(%handle, command = %message.command, "Unknown command ignored");
                Dispatch::Ignored
            }
            Err(e) => {
                self.metrics.record_dropped();
                warn!(%handle, command = %message.command, error = %e, "Message dropped");
                Dispatch::Dropped
            }
        }
    }

    /// Dispatch an already-classified event.
    pub fn on_event(&mut self, handle: SubscriptionHandle, event: Event) -> Dispatch {
        if !self.is_current(handle) {
            return Dispatch::Fenced;
        }
        self.apply(event)
    }

    /// React to a transport connection change.
    ///
    /// Disconnected clears the view. Connected re-subscribes with the
    /// current criteria when the session was knocked offline and
    /// auto-resubscribe is enabled.
    pub fn on_connection_change(
        &mut self,
        connection: ConnectionState,
    ) -> Result<Option<SubscriptionHandle>, TransportError> {
        self.connection = connection;
        match connection {
            ConnectionState::Disconnected => {
                if let Some(handle) = self.active.take() {
                    self.transport.unsubscribe(handle);
                }
                self.view.clear();
                if self.state != SessionState::Idle {
                    self.state = SessionState::Disconnected;
                }
                warn!(topic = %self.criteria.topic, "Connection lost, view cleared");
                Ok(None)
            }
            ConnectionState::Connected => {
                if self.state == SessionState::Disconnected && self.auto_resubscribe {
                    info!(topic = %self.criteria.topic, "Connection restored, resubscribing");
                    self.start(self.criteria.clone()).map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn is_current(&self, handle: SubscriptionHandle) -> bool {
        if self.active == Some(handle) {
            return true;
        }
        self.metrics.record_fenced();
        debug!(%handle, active = ?self.active, "Stale delivery discarded");
        false
    }

    fn apply(&mut self, event: Event) -> Dispatch {
        let label = event.label();
        let completes_snapshot = matches!(event, Event::SnapshotEnd);
        let started = Instant::now();

        if let Err(e) = self.view.apply(event) {
            self.metrics.record_dropped();
            warn!(event = label, error = %e, "Event dropped");
            return Dispatch::Dropped;
        }
        self.metrics
            .record_applied(started.elapsed().as_nanos() as u64);

        if completes_snapshot {
            self.metrics.record_snapshot_completed();
            info!(rows = self.view.snapshot().len(), "Snapshot complete");
        }
        if self.state == SessionState::Starting && !self.view.is_loading() {
            self.state = SessionState::Active;
        }
        Dispatch::Applied
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Point-in-time view of the confirmed rows.
    pub fn snapshot(&self) -> Arc<ViewState> {
        self.view.snapshot()
    }

    pub fn view(&self) -> &MaterializedView {
        &self.view
    }

    pub fn active_handle(&self) -> Option<SubscriptionHandle> {
        self.active
    }

    pub fn criteria(&self) -> &SubscriptionCriteria {
        &self.criteria
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }
}
