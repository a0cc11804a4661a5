//! Integration tests for the provider/listener handshake
//!
//! Tests cover:
//! - Initial value delivery on the first dispatch
//! - Value updates with the previous value
//! - Fan-out order across several listeners
//! - Listener stop ending the subscription

use super::test_utils::{chain, recorded_options};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tether::{Context, ListenerOptions, ListenerStatus, NodeTree};

#[tokio::test]
async fn test_initial_value_delivered_during_start() {
    let tree = NodeTree::new();
    let nodes = chain(&tree, 2);
    let context = Context::with_initial("greeting", "initial1".to_string());
    let _provider = context.provide(tree.clone(), nodes[0], None).unwrap();

    let (options, recorder) = recorded_options::<String>(&tree, nodes[1]);
    let listener = context.listen(options);

    assert_eq!(
        recorder.values(),
        vec![("initial1".to_string(), "initial1".to_string())]
    );
    assert_eq!(
        recorder.statuses(),
        vec![ListenerStatus::Connecting, ListenerStatus::Connected]
    );
    assert_eq!(listener.attempts(), 0);
}

#[tokio::test]
async fn test_update_reaches_connected_listener() {
    let tree = NodeTree::new();
    let nodes = chain(&tree, 1);
    let context = Context::with_initial("greeting", "initial1".to_string());
    let provider = context.provide(tree.clone(), tree.root(), None).unwrap();

    let (options, recorder) = recorded_options::<String>(&tree, nodes[0]);
    let _listener = context.listen(options);
    provider.set_context("v2".to_string());

    assert_eq!(
        recorder.values(),
        vec![
            ("initial1".to_string(), "initial1".to_string()),
            ("v2".to_string(), "initial1".to_string()),
        ]
    );
    assert_eq!(provider.context(), "v2");
}

#[tokio::test]
async fn test_fan_out_follows_connection_order() {
    let tree = NodeTree::new();
    let context = Context::with_initial("score", 0u32);
    let provider = context.provide(tree.clone(), tree.root(), None).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut listeners = Vec::new();
    for tag in ["L1", "L2", "L3"] {
        let node = tree.insert_child(tree.root()).unwrap();
        let sink = Arc::clone(&log);
        listeners.push(context.listen(ListenerOptions::new(
            tree.clone(),
            node,
            move |value: &u32, previous: &u32| sink.lock().push((tag, *value, *previous)),
        )));
    }
    log.lock().clear();

    provider.set_context(5);
    assert_eq!(
        *log.lock(),
        vec![("L1", 5, 0), ("L2", 5, 0), ("L3", 5, 0)]
    );
    assert_eq!(provider.subscriptions().len(), 3);
}

#[tokio::test]
async fn test_every_set_is_delivered() {
    let tree = NodeTree::new();
    let context = Context::with_initial("score", 0u32);
    let provider = context.provide(tree.clone(), tree.root(), None).unwrap();
    let (options, recorder) = recorded_options::<u32>(&tree, tree.root());
    let _listener = context.listen(options);

    provider.set_context(1);
    provider.set_context(1);
    provider.set_context(2);

    assert_eq!(recorder.values(), vec![(0, 0), (1, 0), (1, 1), (2, 1)]);
}

#[tokio::test]
async fn test_stopped_listener_receives_nothing_more() {
    let tree = NodeTree::new();
    let nodes = chain(&tree, 1);
    let context = Context::with_initial("score", 0u32);
    let provider = context.provide(tree.clone(), tree.root(), None).unwrap();
    let (options, recorder) = recorded_options::<u32>(&tree, nodes[0]);
    let listener = context.listen(options);
    assert_eq!(provider.subscription_count(), 1);

    listener.stop();
    assert_eq!(provider.subscription_count(), 0);
    provider.set_context(9);

    assert_eq!(recorder.values(), vec![(0, 0)]);
    assert_eq!(
        recorder.statuses(),
        vec![
            ListenerStatus::Connecting,
            ListenerStatus::Connected,
            ListenerStatus::Initial
        ]
    );
}

#[tokio::test]
async fn test_dropped_listener_ends_subscription() {
    let tree = NodeTree::new();
    let context = Context::with_initial("score", 0u32);
    let provider = context.provide(tree.clone(), tree.root(), None).unwrap();
    let (options, _recorder) = recorded_options::<u32>(&tree, tree.root());
    let listener = context.listen(options);
    assert_eq!(provider.subscription_count(), 1);

    drop(listener);
    assert_eq!(provider.subscription_count(), 0);
}

#[tokio::test]
async fn test_restart_moves_subscription() {
    let tree = NodeTree::new();
    let context = Context::with_initial("score", 0u32);
    let provider = context.provide(tree.clone(), tree.root(), None).unwrap();
    let (options, recorder) = recorded_options::<u32>(&tree, tree.root());
    let listener = context.listen(options.poll_interval(Duration::from_millis(5)));
    let first = provider.subscriptions();

    listener.start();
    let second = provider.subscriptions();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
    assert_eq!(recorder.values(), vec![(0, 0), (0, 0)]);
}

#[tokio::test]
async fn test_producer_initial_value_is_evaluated_per_connect() {
    use std::sync::atomic::{AtomicU32, Ordering};
    let tree = NodeTree::new();
    let next = Arc::new(AtomicU32::new(1));
    let producer_next = Arc::clone(&next);
    let context = Context::with_initial(
        "ticket",
        tether::InitialValue::producer(move || producer_next.fetch_add(1, Ordering::SeqCst)),
    );
    let _provider = context.provide(tree.clone(), tree.root(), None).unwrap();

    let (first_options, first) = recorded_options::<u32>(&tree, tree.root());
    let (second_options, second) = recorded_options::<u32>(&tree, tree.root());
    let _a = context.listen(first_options);
    let _b = context.listen(second_options);

    assert_eq!(first.values(), vec![(1, 1)]);
    assert_eq!(second.values(), vec![(2, 2)]);
}
