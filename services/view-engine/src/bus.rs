//! In-memory loopback bus
//!
//! A single-process stand-in for the pub/sub server. It keeps a
//! state-of-the-world (SOW) record per key for each topic and serves
//! subscriptions the way the real bus does:
//!
//! 1. `subscribe` replays the matching SOW records inside a
//!    `group_begin` / `group_end` pair (ordered, skipped and truncated per
//!    the criteria), then registers for live updates
//! 2. `publish` merges the update into the SOW record and fans it out to
//!    every subscription whose filter the merged record matches
//! 3. a record that stops matching produces an `oof` for subscriptions that
//!    asked for out-of-focus notifications
//!
//! Callbacks run while the bus lock is held so per-subscription delivery
//! order always equals publish order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use grid_types::errors::TransportError;
use grid_types::value::Value;
use tracing::{debug, info, warn};

use crate::events::{Command, Message};
use crate::filter::{Filter, OrderBy};
use crate::transport::{
    ConnectionCallback, ConnectionState, DeliveryCallback, ListenerId, SubscriptionCriteria,
    SubscriptionHandle, Transport,
};

/// Configuration for the loopback bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Whether the bus reports `Connected` when created.
    pub start_connected: bool,
    /// Maximum number of concurrent subscriptions.
    pub max_subscriptions: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            start_connected: true,
            max_subscriptions: 64,
        }
    }
}

/// One SOW record.
#[derive(Debug, Clone)]
struct SowRecord {
    /// Insertion sequence; default snapshot order.
    seq: u64,
    data: BTreeMap<String, Value>,
}

struct BusSubscription {
    topic: String,
    filter: Option<Filter>,
    criteria: SubscriptionCriteria,
    callback: DeliveryCallback,
    /// Keys currently matching this subscription's filter.
    in_focus: BTreeSet<String>,
    /// Keys the client holds a full row for. Rows trimmed from the
    /// snapshot by top_n/skip_n match but were never sent.
    sent: BTreeSet<String>,
}

impl BusSubscription {
    fn admits(&self, data: &BTreeMap<String, Value>) -> bool {
        self.filter.as_ref().map(|f| f.matches(data)).unwrap_or(true)
    }

    fn project(&self, data: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        data.iter()
            .filter(|(name, _)| self.criteria.options.selects(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn deliver(&self, handle: SubscriptionHandle, command: Command, key: &str, data: Option<BTreeMap<String, Value>>) {
        let message = Message {
            command: command.as_str().to_string(),
            sow_key: Some(key.to_string()),
            data,
        };
        (self.callback)(handle, message);
    }
}

struct BusState {
    connected: bool,
    next_handle: u64,
    next_seq: u64,
    topics: BTreeMap<String, BTreeMap<String, SowRecord>>,
    subscriptions: BTreeMap<SubscriptionHandle, BusSubscription>,
    next_listener: u64,
    listeners: BTreeMap<ListenerId, ConnectionCallback>,
}

/// Loopback transport with SOW storage.
pub struct InMemoryBus {
    state: Mutex<BusState>,
    config: BusConfig,
}

impl InMemoryBus {
    pub fn new(config: BusConfig) -> Self {
        info!(
            start_connected = config.start_connected,
            max_subscriptions = config.max_subscriptions,
            "InMemoryBus initialized"
        );
        Self {
            state: Mutex::new(BusState {
                connected: config.start_connected,
                next_handle: 1,
                next_seq: 0,
                topics: BTreeMap::new(),
                subscriptions: BTreeMap::new(),
                next_listener: 1,
                listeners: BTreeMap::new(),
            }),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an update for `sow_key` on `topic`.
    ///
    /// The update is merged into the stored record field-wise. Returns the
    /// number of messages delivered to subscribers.
    pub fn publish<I, K, V>(&self, topic: &str, sow_key: &str, fields: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let update: BTreeMap<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut guard = self.lock();
        let state = &mut *guard;

        let seq = state.next_seq;
        let records = state.topics.entry(topic.to_string()).or_default();
        let record = records.entry(sow_key.to_string()).or_insert_with(|| SowRecord {
            seq,
            data: BTreeMap::new(),
        });
        if record.seq == seq {
            state.next_seq += 1;
        }
        for (name, value) in &update {
            if value.is_null() {
                record.data.entry(name.clone()).or_insert(Value::Null);
            } else {
                record.data.insert(name.clone(), value.clone());
            }
        }
        let merged = record.data.clone();

        if !state.connected {
            return 0;
        }

        let mut delivered = 0;
        for (handle, sub) in state.subscriptions.iter_mut() {
            if sub.topic != topic {
                continue;
            }
            let was_in_focus = sub.in_focus.contains(sow_key);
            let was_sent = sub.sent.contains(sow_key);
            if sub.admits(&merged) {
                let (command, data) = if sub.criteria.options.delta && was_sent {
                    (Command::DeltaPublish, sub.project(&update))
                } else {
                    (Command::Publish, sub.project(&merged))
                };
                sub.in_focus.insert(sow_key.to_string());
                sub.sent.insert(sow_key.to_string());
                sub.deliver(*handle, command, sow_key, Some(data));
                delivered += 1;
            } else if was_in_focus {
                sub.in_focus.remove(sow_key);
                sub.sent.remove(sow_key);
                if sub.criteria.options.oof {
                    sub.deliver(*handle, Command::Oof, sow_key, None);
                    delivered += 1;
                }
            }
        }

        debug!(topic, sow_key, delivered, "Published");
        delivered
    }

    /// Delete a SOW record. Subscriptions holding it in focus receive an
    /// `oof` when they asked for one.
    pub fn delete(&self, topic: &str, sow_key: &str) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        let existed = state
            .topics
            .get_mut(topic)
            .and_then(|records| records.remove(sow_key))
            .is_some();
        if !existed || !state.connected {
            return existed;
        }

        for (handle, sub) in state.subscriptions.iter_mut() {
            if sub.topic != topic {
                continue;
            }
            sub.sent.remove(sow_key);
            if sub.in_focus.remove(sow_key) && sub.criteria.options.oof {
                sub.deliver(*handle, Command::Oof, sow_key, None);
            }
        }
        existed
    }

    /// Simulate the client connection going up or down.
    ///
    /// Going down drops every subscription, as a real server would on a
    /// lost session. Listeners are notified on each transition.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.lock();
        if state.connected == connected {
            return;
        }
        state.connected = connected;
        if !connected {
            let dropped = state.subscriptions.len();
            state.subscriptions.clear();
            warn!(dropped_subscriptions = dropped, "Bus disconnected");
        } else {
            info!("Bus connected");
        }

        let notice = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        for listener in state.listeners.values() {
            listener(notice);
        }
    }

    /// Number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Number of registered connection listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Number of SOW records stored for a topic.
    pub fn sow_len(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map(|r| r.len()).unwrap_or(0)
    }

    /// Current stored record for a key.
    pub fn sow_record(&self, topic: &str, sow_key: &str) -> Option<BTreeMap<String, Value>> {
        self.lock()
            .topics
            .get(topic)
            .and_then(|records| records.get(sow_key))
            .map(|r| r.data.clone())
    }
}

impl Transport for InMemoryBus {
    fn subscribe(
        &self,
        criteria: &SubscriptionCriteria,
        on_message: DeliveryCallback,
    ) -> Result<SubscriptionHandle, TransportError> {
        let filter = criteria
            .filter
            .as_deref()
            .map(Filter::parse)
            .transpose()
            .map_err(|e| TransportError::InvalidFilter {
                filter: criteria.filter.clone().unwrap_or_default(),
                reason: e.to_string(),
            })?;
        let order_by = criteria
            .order_by
            .as_deref()
            .map(OrderBy::parse)
            .transpose()
            .map_err(|e| TransportError::Rejected {
                reason: format!("invalid order_by: {}", e),
            })?;

        if matches!(&criteria.options.select, Some(cols) if cols.is_empty()) {
            return Err(TransportError::InvalidOptions {
                options: criteria.options.to_string(),
                reason: "select must name at least one field".to_string(),
            });
        }

        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.subscriptions.len() >= self.config.max_subscriptions {
            return Err(TransportError::Rejected {
                reason: format!(
                    "max subscriptions ({}) reached",
                    self.config.max_subscriptions
                ),
            });
        }

        let handle = SubscriptionHandle::new(state.next_handle);
        state.next_handle += 1;

        let mut sub = BusSubscription {
            topic: criteria.topic.clone(),
            filter,
            criteria: criteria.clone(),
            callback: on_message,
            in_focus: BTreeSet::new(),
            sent: BTreeSet::new(),
        };

        let mut matching: Vec<(&String, &SowRecord)> = state
            .topics
            .get(&criteria.topic)
            .map(|records| records.iter().filter(|(_, r)| sub.admits(&r.data)).collect())
            .unwrap_or_default();
        matching.sort_by(|(_, a), (_, b)| match &order_by {
            Some(order) => order.compare(&a.data, &b.data).then(a.seq.cmp(&b.seq)),
            None => a.seq.cmp(&b.seq),
        });

        let skip = criteria.options.skip_n.unwrap_or(0);
        let take = criteria.options.top_n.unwrap_or(usize::MAX);

        (sub.callback)(handle, Message::group_begin());
        for (key, record) in matching.iter().skip(skip).take(take) {
            sub.deliver(handle, Command::Sow, key, Some(sub.project(&record.data)));
            sub.sent.insert((*key).clone());
        }
        (sub.callback)(handle, Message::group_end());

        // Rows trimmed by top_n/skip_n still match; their next update is
        // sent whole as a publish.
        sub.in_focus = matching.iter().map(|(k, _)| (*k).clone()).collect();
        let sent = sub.sent.len();
        state.subscriptions.insert(handle, sub);

        info!(
            %handle,
            topic = %criteria.topic,
            filter = criteria.filter.as_deref().unwrap_or(""),
            options = %criteria.options,
            snapshot_rows = sent,
            "Subscription opened"
        );
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.lock().subscriptions.remove(&handle).is_some() {
            debug!(%handle, "Subscription closed");
        }
    }

    fn on_connection_change(&self, listener: ConnectionCallback) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.insert(id, listener);
        id
    }

    fn remove_connection_listener(&self, id: ListenerId) {
        self.lock().listeners.remove(&id);
    }

    fn connection_state(&self) -> ConnectionState {
        if self.lock().connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}
