//! Session driver task
//!
//! Runs a `SubscriptionSession` on its own tokio task. Transport callbacks,
//! connection listeners and control requests all feed one unbounded queue,
//! so the session sees a single ordered stream of inputs and is never
//! touched from two places at once.
//!
//! The callbacks registered with the transport hold weak senders, so the
//! queue closes once every `DriverHandle` sender is gone. A dropped handle
//! stops the session the same way `shutdown` does.
//!
//! After each batch of inputs the driver publishes a `SessionSnapshot`
//! through a watch channel. A snapshot holds an `Arc<ViewState>`, so a
//! reader keeps a consistent picture for as long as it holds it.

use std::sync::Arc;

use grid_types::errors::TransportError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::Message;
use crate::metrics::SessionMetrics;
use crate::session::{SessionConfig, SessionState, SubscriptionSession};
use crate::transport::{
    ConnectionState, DeliveryCallback, ListenerId, SubscriptionCriteria, SubscriptionHandle,
    Transport,
};
use crate::view::ViewState;

/// Errors surfaced through a `DriverHandle`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("session driver has stopped")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Inputs consumed by the driver task.
#[derive(Debug)]
pub enum SessionInput {
    Deliver(SubscriptionHandle, Message),
    Connection(ConnectionState),
    ChangeFilter {
        filter: Option<String>,
        /// `Ok(true)` when a new subscription was opened.
        reply: oneshot::Sender<Result<bool, TransportError>>,
    },
    Stop,
}

/// What a renderer sees.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub connection: ConnectionState,
    pub handle: Option<SubscriptionHandle>,
    pub view: Arc<ViewState>,
}

impl SessionSnapshot {
    fn capture(session: &SubscriptionSession) -> Self {
        Self {
            state: session.state(),
            connection: session.connection_state(),
            handle: session.active_handle(),
            view: session.snapshot(),
        }
    }

    fn same_as(&self, other: &SessionSnapshot) -> bool {
        self.state == other.state
            && self.connection == other.connection
            && self.handle == other.handle
            && Arc::ptr_eq(&self.view, &other.view)
    }

    /// Connected with a subscription in place.
    pub fn is_live(&self) -> bool {
        self.connection == ConnectionState::Connected
            && matches!(self.state, SessionState::Starting | SessionState::Active)
    }
}

/// Read side of a running driver.
pub type ViewReader = watch::Receiver<Arc<SessionSnapshot>>;

/// Spawns session drivers.
pub struct SessionDriver;

impl SessionDriver {
    /// Start a driver on the current tokio runtime and issue the initial
    /// subscription.
    pub fn spawn(transport: Arc<dyn Transport>, config: SessionConfig) -> DriverHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let deliveries = tx.downgrade();
        let sink: DeliveryCallback = Arc::new(move |handle, message| {
            if let Some(tx) = deliveries.upgrade() {
                let _ = tx.send(SessionInput::Deliver(handle, message));
            }
        });

        let connections = tx.downgrade();
        let listener = transport.on_connection_change(Arc::new(move |state| {
            if let Some(tx) = connections.upgrade() {
                let _ = tx.send(SessionInput::Connection(state));
            }
        }));

        let criteria = config.criteria();
        let session = SubscriptionSession::new(Arc::clone(&transport), config, sink);
        let metrics = session.metrics();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(SessionSnapshot::capture(&session)));

        let task = tokio::spawn(async move {
            run(session, criteria, rx, snapshot_tx).await;
            transport.remove_connection_listener(listener);
        });

        DriverHandle {
            tx,
            reader: snapshot_rx,
            metrics,
            task,
        }
    }
}

async fn run(
    mut session: SubscriptionSession,
    criteria: SubscriptionCriteria,
    mut rx: mpsc::UnboundedReceiver<SessionInput>,
    snapshots: watch::Sender<Arc<SessionSnapshot>>,
) {
    info!(topic = %criteria.topic, "Session driver started");
    if let Err(e) = session.start(criteria) {
        warn!(error = %e, "Initial subscribe failed, waiting for connection");
    }
    publish(&session, &snapshots);

    let mut stopping = false;
    while let Some(input) = rx.recv().await {
        stopping = handle_input(&mut session, input);

        // Drain whatever else is queued before publishing.
        while !stopping {
            match rx.try_recv() {
                Ok(input) => stopping = handle_input(&mut session, input),
                Err(_) => break,
            }
        }

        publish(&session, &snapshots);
        if stopping {
            break;
        }
    }

    if !stopping {
        debug!("All driver handles dropped, stopping session");
        session.stop();
        publish(&session, &snapshots);
    }
    info!(metrics = ?session.metrics().snapshot(), "Session driver stopped");
}

/// Returns true when the driver should stop.
fn handle_input(session: &mut SubscriptionSession, input: SessionInput) -> bool {
    match input {
        SessionInput::Deliver(handle, message) => {
            session.on_message(handle, message);
        }
        SessionInput::Connection(state) => {
            if let Err(e) = session.on_connection_change(state) {
                warn!(error = %e, "Resubscribe after reconnect failed");
            }
        }
        SessionInput::ChangeFilter { filter, reply } => {
            let result = session.restart(filter).map(|h| h.is_some());
            let _ = reply.send(result);
        }
        SessionInput::Stop => {
            session.stop();
            return true;
        }
    }
    false
}

fn publish(session: &SubscriptionSession, snapshots: &watch::Sender<Arc<SessionSnapshot>>) {
    let next = SessionSnapshot::capture(session);
    let changed = snapshots.send_if_modified(|current| {
        if current.same_as(&next) {
            false
        } else {
            *current = Arc::new(next);
            true
        }
    });
    if changed {
        debug!(rows = snapshots.borrow().view.len(), "Snapshot published");
    }
}

/// Control and read handle for a running driver.
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<SessionInput>,
    reader: ViewReader,
    metrics: Arc<SessionMetrics>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Change the subscription filter. Returns whether a new subscription
    /// was opened (`false` when the filter was unchanged).
    pub async fn change_filter(&self, filter: Option<String>) -> Result<bool, DriverError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SessionInput::ChangeFilter { filter, reply })
            .map_err(|_| DriverError::Closed)?;
        let result = response.await.map_err(|_| DriverError::Closed)?;
        Ok(result?)
    }

    /// A new receiver for published snapshots.
    pub fn reader(&self) -> ViewReader {
        self.reader.clone()
    }

    /// Latest published snapshot.
    pub fn current(&self) -> Arc<SessionSnapshot> {
        self.reader.borrow().clone()
    }

    /// Queue a raw input, e.g. a delivery from an external transport.
    pub fn send(&self, input: SessionInput) -> Result<(), DriverError> {
        self.tx.send(input).map_err(|_| DriverError::Closed)
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop the session and wait for the task to finish.
    pub async fn shutdown(self) -> Result<(), DriverError> {
        // Already stopped if the send fails; still join the task.
        let _ = self.tx.send(SessionInput::Stop);
        self.task.await.map_err(|_| DriverError::Closed)
    }
}
