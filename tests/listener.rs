//! Integration tests for subscribing, channel membership and cancellation.

use pg_listener::{
    ListenError, ListenEvents, Listener, ListenerConfig, MemoryDriver, RetryOptions,
    SubscriptionState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_listener(driver: &Arc<MemoryDriver>) -> Listener {
    init_tracing();
    let mut config = ListenerConfig::new(driver.clone());
    config.retry_all = RetryOptions::limit(0);
    Listener::new(config)
}

// --- Subscribing ---

#[test]
fn test_subscribe_without_channels() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);

    let sub = listener.subscribe::<&str>(&[], ListenEvents::new()).unwrap();

    assert!(sub.is_connected());
    assert!(sub.is_live());
    assert_eq!(sub.connect_count(), 1);
    assert_eq!(sub.state(), SubscriptionState::Connected);
    // No channels, no statements.
    assert!(driver.journal().is_empty());
    assert_eq!(driver.open_connections(), 1);
}

#[test]
fn test_subscribe_listens_on_every_channel() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);

    let sub = listener
        .subscribe(&["orders", "Payments", "orders"], ListenEvents::new())
        .unwrap();

    assert_eq!(sub.channels(), vec!["orders", "Payments"]);
    assert_eq!(driver.journal(), vec!["listen orders", "listen \"Payments\""]);
    assert_eq!(driver.listeners("orders"), 1);
    assert_eq!(driver.listeners("Payments"), 1);
}

#[test]
fn test_capitalized_sql() {
    let driver = Arc::new(MemoryDriver::new());
    let mut config = ListenerConfig::new(driver.clone());
    config.capitalized_sql = true;
    let listener = Listener::new(config);

    listener.subscribe(&["jobs"], ListenEvents::new()).unwrap();
    assert_eq!(driver.journal(), vec!["LISTEN jobs"]);
}

#[test]
fn test_connected_handler_gets_first_count() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let (tx, rx) = crossbeam_channel::unbounded();

    listener
        .subscribe(
            &["a"],
            ListenEvents::new().on_connected(move |connection, count| {
                let _ = tx.send((connection.process_id(), count));
            }),
        )
        .unwrap();

    let (pid, count) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(pid.is_some());
    assert_eq!(count, 1);
}

#[test]
fn test_invalid_channel_is_rejected() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);

    let result = listener.subscribe(&["ok", " "], ListenEvents::new());

    assert!(matches!(result, Err(ListenError::InvalidChannel(_))));
    assert_eq!(driver.connect_attempts(), 0);
}

// --- Initial Connect ---

#[test]
fn test_initial_connect_retries_then_succeeds() {
    let driver = Arc::new(MemoryDriver::new());
    let mut config = ListenerConfig::new(driver.clone());
    config.retry_initial = Some(RetryOptions::limit(3).with_delay(Duration::from_millis(5)));
    config.retry_all = RetryOptions::limit(0);
    let listener = Listener::new(config);
    driver.refuse_connections(2);

    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();

    assert_eq!(driver.connect_attempts(), 3);
    assert_eq!(sub.connect_count(), 1);
}

#[test]
fn test_initial_connect_failure_propagates() {
    let driver = Arc::new(MemoryDriver::new());
    let mut config = ListenerConfig::new(driver.clone());
    config.retry_all = RetryOptions::limit(2).with_delay(Duration::from_millis(10));
    let listener = Listener::new(config);
    driver.refuse_all_connections();

    let start = Instant::now();
    let result = listener.subscribe(&["a"], ListenEvents::new());

    assert!(matches!(result, Err(ListenError::Connect(_))));
    assert_eq!(driver.connect_attempts(), 3);
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(listener.active_subscriptions().is_empty());
}

#[test]
fn test_failed_listen_releases_connection() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    driver.reject_statements(true);

    let result = listener.subscribe(&["a"], ListenEvents::new());

    assert!(matches!(result, Err(ListenError::Statement(_))));
    assert_eq!(driver.open_connections(), 0);
}

// --- Channel Membership ---

#[test]
fn test_add_only_new_channels() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();

    let added = sub.add(&["a"]).unwrap();
    assert!(added.is_empty());
    assert_eq!(driver.journal().len(), 1);

    let added = sub.add(&["a", "b", "c", "b"]).unwrap();
    assert_eq!(added, vec!["b", "c"]);
    assert_eq!(sub.channels(), vec!["a", "b", "c"]);
    assert_eq!(driver.journal(), vec!["listen a", "listen b", "listen c"]);
}

#[test]
fn test_add_statement_failure_keeps_set() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();
    driver.reject_statements(true);

    assert!(matches!(sub.add(&["b"]), Err(ListenError::Statement(_))));
    assert_eq!(sub.channels(), vec!["a"]);
}

#[test]
fn test_remove_tracked_channels() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a", "b"], ListenEvents::new()).unwrap();

    assert!(sub.remove(&["zzz"]).unwrap().is_empty());

    let removed = sub.remove(&["b", "a", "zzz"]).unwrap();
    assert_eq!(removed, vec!["b", "a"]);
    assert!(sub.channels().is_empty());
    assert_eq!(driver.listeners("a"), 0);

    // Connection stays open with nothing left to listen on.
    assert!(sub.is_connected());
    assert_eq!(driver.open_connections(), 1);
}

// --- Notify ---

#[test]
fn test_notify_round_trip() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();
    let stream = sub.stream();

    assert!(sub.notify(&["a"], Some("hello")).unwrap());
    assert!(sub.notify(&["a"], None).unwrap());

    let first = stream.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first.payload, "hello");
    assert_eq!(first.length, 5);
    let second = stream.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second.payload, "");
}

#[test]
fn test_notify_json_payloads() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();
    let stream = sub.stream();

    sub.notify_json(&["a"], &serde_json::json!({"id": 1})).unwrap();
    sub.notify_json(&["a"], "plain").unwrap();
    sub.notify_json(&["a"], &42).unwrap();
    sub.notify_json(&["a"], &()).unwrap();

    let payloads: Vec<_> = (0..4)
        .map(|_| stream.recv_timeout(Duration::from_secs(1)).unwrap().payload)
        .collect();
    assert_eq!(payloads, vec!["{\"id\":1}", "plain", "42", ""]);
}

#[test]
fn test_notify_empty_channel_list() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();
    let before = driver.journal().len();

    assert!(!sub.notify::<&str>(&[], Some("x")).unwrap());
    assert_eq!(driver.journal().len(), before);

    sub.cancel(false);
    assert!(!sub.notify::<&str>(&[], Some("x")).unwrap());
}

#[test]
fn test_notify_after_cancel() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();

    assert!(sub.cancel(false));
    assert!(!sub.notify(&["a"], Some("x")).unwrap());
}

#[test]
fn test_notify_statement_failure_propagates() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();
    driver.reject_statements(true);

    assert!(matches!(
        sub.notify(&["a"], Some("x")),
        Err(ListenError::Statement(_))
    ));
}

// --- Cancel ---

#[test]
fn test_cancel_once() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();

    assert!(sub.cancel(false));
    assert!(!sub.cancel(false));
    assert!(!sub.cancel(true));

    assert!(!sub.is_connected());
    assert!(!sub.is_live());
    assert_eq!(sub.state(), SubscriptionState::Closed);
    assert_eq!(driver.open_connections(), 0);
    assert!(listener.active_subscriptions().is_empty());
}

#[test]
fn test_cancel_with_unlisten() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a", "b"], ListenEvents::new()).unwrap();

    assert!(sub.cancel(true));

    let journal = driver.journal();
    assert_eq!(&journal[2..], ["unlisten a", "unlisten b"]);
}

#[test]
fn test_cancel_survives_unlisten_failure() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let sub = listener.subscribe(&["a"], ListenEvents::new()).unwrap();
    driver.reject_statements(true);

    assert!(sub.cancel(true));
    assert_eq!(driver.open_connections(), 0);
}

// --- Registry ---

#[test]
fn test_active_subscriptions_in_creation_order() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let first = listener.subscribe(&["a"], ListenEvents::new()).unwrap();
    let second = listener.subscribe(&["b"], ListenEvents::new()).unwrap();

    let records = listener.active_subscriptions();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, first.id());
    assert_eq!(records[1].id, second.id());
    assert_eq!(records[1].channels, vec!["b"]);
    assert!(records[0].created <= records[1].created);
}

#[test]
fn test_cancel_all_subscriptions() {
    let driver = Arc::new(MemoryDriver::new());
    let listener = test_listener(&driver);
    let subs: Vec<_> = (0..4)
        .map(|i| {
            listener
                .subscribe(&[format!("chan_{}", i)], ListenEvents::new())
                .unwrap()
        })
        .collect();
    subs[0].cancel(false);

    assert_eq!(listener.cancel_all_subscriptions(true), 3);
    assert!(listener.active_subscriptions().is_empty());
    assert!(subs.iter().all(|s| !s.is_live()));
    assert_eq!(driver.open_connections(), 0);
    assert_eq!(listener.cancel_all_subscriptions(true), 0);
}
