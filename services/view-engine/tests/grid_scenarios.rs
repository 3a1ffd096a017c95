//! End-to-end grid scenarios
//!
//! Drives the engine through the in-memory bus the way a grid client
//! would:
//! - Snapshot load, live merge and out-of-focus removal
//! - Filter changes with late deliveries from the old subscription
//! - Readers racing a snapshot swap
//! - Connection loss and recovery

use std::sync::{Arc, Mutex};
use std::time::Duration;

use grid_types::row::RowKey;
use grid_types::value::Value;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;
use view_engine::{
    ConnectionState, Dispatch, Event, InMemoryBus, Message, SessionConfig, SessionDriver,
    SessionSnapshot, SessionState, SubscriptionHandle, SubscriptionOptions, SubscriptionSession,
    Transport, ViewReader,
};
use view_engine::transport::DeliveryCallback;

type Mailbox = Arc<Mutex<Vec<(SubscriptionHandle, Message)>>>;

fn mailbox_sink() -> (Mailbox, DeliveryCallback) {
    let mailbox: Mailbox = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::clone(&mailbox);
    (mailbox, Arc::new(move |h, m| queue.lock().unwrap().push((h, m))))
}

/// Route engine logs to the test harness; `RUST_LOG=view_engine=debug`
/// shows them for a failing run.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn drain(session: &mut SubscriptionSession, mailbox: &Mailbox) {
    let pending: Vec<_> = mailbox.lock().unwrap().drain(..).collect();
    for (h, m) in pending {
        session.on_message(h, m);
    }
}

async fn wait_for<F>(reader: &mut ViewReader, pred: F) -> Arc<SessionSnapshot>
where
    F: FnMut(&Arc<SessionSnapshot>) -> bool,
{
    let snapshot = timeout(Duration::from_secs(5), reader.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("driver stopped");
    let snapshot: Arc<SessionSnapshot> = (*snapshot).clone();
    snapshot
}

#[test]
fn snapshot_then_deltas_scenario() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    bus.publish("orders", "1", vec![("id", 1), ("price", 10)]);
    bus.publish("orders", "2", vec![("id", 2), ("price", 20)]);

    let (mailbox, sink) = mailbox_sink();
    let config = SessionConfig::new("orders").with_options(SubscriptionOptions::new().with_oof());
    let mut session = SubscriptionSession::new(bus.clone(), config.clone(), sink);
    session.start(config.criteria()).unwrap();
    drain(&mut session, &mailbox);

    let view = session.snapshot();
    let keys: Vec<_> = view.keys().map(|k| k.as_str().to_string()).collect();
    assert_eq!(keys, vec!["1", "2"]);

    bus.publish("orders", "1", vec![("price", 11)]);
    drain(&mut session, &mailbox);
    let view = session.snapshot();
    assert_eq!(view.get(&RowKey::new("1")).unwrap().get("price"), Some(&Value::from(11)));
    assert_eq!(view.position(&RowKey::new("1")), Some(0));

    bus.delete("orders", "2");
    drain(&mut session, &mailbox);
    let view = session.snapshot();
    assert_eq!(view.len(), 1);
    assert!(view.contains(&RowKey::new("1")));
}

#[test]
fn row_leaving_filter_is_removed_with_oof() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    bus.publish("market_data", "IBM", vec![("bid", 600)]);
    bus.publish("market_data", "KO", vec![("bid", 700)]);

    let (mailbox, sink) = mailbox_sink();
    let config = SessionConfig::default()
        .with_filter("/bid > 500")
        .with_options(SubscriptionOptions::new().with_oof());
    let mut session = SubscriptionSession::new(bus.clone(), config.clone(), sink);
    session.start(config.criteria()).unwrap();
    drain(&mut session, &mailbox);
    assert_eq!(session.snapshot().len(), 2);

    bus.publish("market_data", "IBM", vec![("bid", 400)]);
    drain(&mut session, &mailbox);
    assert!(!session.snapshot().contains(&RowKey::new("IBM")));
    assert_eq!(session.snapshot().len(), 1);
}

#[test]
fn late_deliveries_from_old_filter_are_discarded() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    bus.publish("market_data", "IBM", vec![("bid", 100)]);
    bus.publish("market_data", "MSFT", vec![("bid", 300)]);

    let (mailbox, sink) = mailbox_sink();
    let mut session = SubscriptionSession::new(bus.clone(), SessionConfig::default(), sink);
    let old = session.start(SessionConfig::default().criteria()).unwrap();

    // Old snapshot is still queued when the filter changes.
    let new = session
        .restart(Some("/bid > 200".to_string()))
        .unwrap()
        .unwrap();
    let pending: Vec<_> = mailbox.lock().unwrap().drain(..).collect();
    let mut fenced = 0;
    for (h, m) in pending {
        if session.on_message(h, m) == Dispatch::Fenced {
            assert_eq!(h, old);
            fenced += 1;
        }
    }
    assert_eq!(fenced, 4);

    let view = session.snapshot();
    assert_eq!(view.len(), 1);
    assert!(view.contains(&RowKey::new("MSFT")));
    assert_eq!(session.active_handle(), Some(new));

    assert_eq!(
        session.on_event(old, Event::Remove(RowKey::new("MSFT"))),
        Dispatch::Fenced
    );
    assert_eq!(session.snapshot().len(), 1);
}

#[test]
fn delta_updates_to_rows_beyond_top_n_arrive_whole() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    bus.publish("md", "IBM", vec![("symbol", Value::from("IBM")), ("bid", Value::from(100)), ("ask", Value::from(101))]);
    bus.publish("md", "KO", vec![("symbol", Value::from("KO")), ("bid", Value::from(50)), ("ask", Value::from(51))]);

    let (mailbox, sink) = mailbox_sink();
    let options: SubscriptionOptions = "delta,top_n=1".parse().unwrap();
    let config = SessionConfig::new("md").with_options(options);
    let mut session = SubscriptionSession::new(bus.clone(), config.clone(), sink);
    session.start(config.criteria()).unwrap();
    drain(&mut session, &mailbox);
    assert_eq!(session.snapshot().len(), 1);

    bus.publish("md", "KO", vec![("bid", 52)]);
    bus.publish("md", "KO", vec![("ask", 53)]);
    drain(&mut session, &mailbox);

    let view = session.snapshot();
    let ko = view.get(&RowKey::new("KO")).expect("KO row");
    assert_eq!(ko.get("symbol"), Some(&Value::from("KO")));
    assert_eq!(ko.get("bid"), Some(&Value::from(52)));
    assert_eq!(ko.get("ask"), Some(&Value::from(53)));
}

#[test]
fn unknown_commands_leave_view_untouched() {
    let bus = Arc::new(InMemoryBus::with_defaults());
    bus.publish("market_data", "IBM", vec![("bid", 100)]);
    let (mailbox, sink) = mailbox_sink();
    let mut session = SubscriptionSession::new(bus.clone(), SessionConfig::default(), sink);
    let handle = session.start(SessionConfig::default().criteria()).unwrap();
    drain(&mut session, &mailbox);

    let before = session.snapshot();
    for command in ["ack", "stats", "sow_delete", ""] {
        assert_eq!(
            session.on_message(handle, Message::custom(command)),
            Dispatch::Ignored
        );
    }
    assert!(Arc::ptr_eq(&before, &session.snapshot()));
}

#[tokio::test]
async fn readers_see_all_old_or_all_new_rows() {
    init_tracing();
    let bus = Arc::new(InMemoryBus::with_defaults());
    for i in 0..200 {
        bus.publish("market_data", &format!("OLD{}", i), vec![("side", "old")]);
    }

    let config = SessionConfig::default().with_filter("/side = 'old'");
    let driver = SessionDriver::spawn(bus.clone(), config);
    let mut reader = driver.reader();
    wait_for(&mut reader, |s| s.view.len() == 200).await;

    for i in 0..300 {
        bus.publish("market_data", &format!("NEW{}", i), vec![("side", "new")]);
    }

    let watcher = {
        let mut reader = driver.reader();
        tokio::spawn(async move {
            let mut observed = 0usize;
            loop {
                {
                    let snap = reader.borrow_and_update().clone();
                    let sides: Vec<_> = snap
                        .view
                        .iter()
                        .filter_map(|r| r.get("side").and_then(Value::as_str).map(str::to_string))
                        .collect();
                    let all_old = sides.iter().all(|s| s == "old");
                    let all_new = sides.iter().all(|s| s == "new");
                    assert!(all_old || all_new, "mixed snapshot observed");
                    observed += 1;
                    if !sides.is_empty() && all_new {
                        return observed;
                    }
                }
                if reader.changed().await.is_err() {
                    return observed;
                }
            }
        })
    };

    assert!(driver
        .change_filter(Some("/side = 'new'".to_string()))
        .await
        .unwrap());
    let snap = wait_for(&mut reader, |s| s.view.len() == 300).await;
    assert_eq!(snap.state, SessionState::Active);

    let observed = timeout(Duration::from_secs(5), watcher).await.unwrap().unwrap();
    assert!(observed >= 1);

    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn connection_loss_presents_empty_grid() {
    init_tracing();
    let bus = Arc::new(InMemoryBus::with_defaults());
    bus.publish("market_data", "IBM", vec![("bid", 100)]);

    let driver = SessionDriver::spawn(bus.clone(), SessionConfig::default());
    let mut reader = driver.reader();
    wait_for(&mut reader, |s| s.view.len() == 1).await;

    bus.set_connected(false);
    let snap = wait_for(&mut reader, |s| s.state == SessionState::Disconnected).await;
    assert!(snap.view.is_empty());
    assert_eq!(snap.connection, ConnectionState::Disconnected);
    assert_eq!(bus.connection_state(), ConnectionState::Disconnected);

    // Updates while down land in the SOW and show up after resubscribe.
    bus.publish("market_data", "KO", vec![("bid", 50)]);
    bus.set_connected(true);
    let snap = wait_for(&mut reader, |s| {
        s.state == SessionState::Active && s.view.len() == 2
    })
    .await;
    assert!(snap.view.contains(&RowKey::new("KO")));

    driver.shutdown().await.unwrap();
}
