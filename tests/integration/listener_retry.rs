//! Integration tests for listener polling and the retry budget
//!
//! These run on a paused tokio clock so poll ticks happen deterministically.

use super::test_utils::{chain, count_dispatches, recorded_options};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tether::{Context, ListenerStatus, NodeTree};
use tokio::time::sleep;

const POLL: Duration = Duration::from_millis(10);

#[tokio::test(start_paused = true)]
async fn test_times_out_after_exactly_max_attempts() {
    let tree = NodeTree::new();
    let nodes = chain(&tree, 2);
    let context: Context<u32> = Context::new("missing");
    let dispatches = count_dispatches(&tree, nodes[1], "missing");

    let (options, recorder) = recorded_options::<u32>(&tree, nodes[1]);
    let listener = context.listen(options.poll_interval(POLL).max_attempts(3));
    assert_eq!(listener.status(), ListenerStatus::Connecting);
    assert_eq!(dispatches.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.status(), ListenerStatus::Timeout);
    assert_eq!(listener.attempts(), 3);
    assert_eq!(dispatches.load(Ordering::SeqCst), 3);
    assert_eq!(
        recorder.statuses(),
        vec![ListenerStatus::Connecting, ListenerStatus::Timeout]
    );

    // Nothing more is attempted after giving up
    sleep(Duration::from_millis(100)).await;
    assert_eq!(dispatches.load(Ordering::SeqCst), 3);
    assert!(recorder.values().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connects_to_provider_started_while_polling() {
    let tree = NodeTree::new();
    let nodes = chain(&tree, 3);
    let context = Context::with_initial("theme", "dark".to_string());
    let dispatches = count_dispatches(&tree, nodes[2], "theme");

    let (options, recorder) = recorded_options::<String>(&tree, nodes[2]);
    let listener = context.listen(options.poll_interval(POLL).max_attempts(10));

    sleep(Duration::from_millis(25)).await;
    assert_eq!(listener.status(), ListenerStatus::Connecting);
    assert_eq!(listener.attempts(), 3);

    let provider = context.provide(tree.clone(), nodes[0], None).unwrap();
    sleep(Duration::from_millis(10)).await;

    assert!(listener.is_connected());
    assert_eq!(provider.subscription_count(), 1);
    assert_eq!(dispatches.load(Ordering::SeqCst), 4);
    assert_eq!(
        recorder.values(),
        vec![("dark".to_string(), "dark".to_string())]
    );
    assert_eq!(
        recorder.statuses(),
        vec![ListenerStatus::Connecting, ListenerStatus::Connected]
    );

    // Further ticks after connecting dispatch nothing
    sleep(Duration::from_millis(200)).await;
    assert_eq!(dispatches.load(Ordering::SeqCst), 4);
    assert_eq!(provider.subscription_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_polling() {
    let tree = NodeTree::new();
    let context: Context<u32> = Context::new("missing");
    let dispatches = count_dispatches(&tree, tree.root(), "missing");

    let (options, recorder) = recorded_options::<u32>(&tree, tree.root());
    let listener = context.listen(options.poll_interval(POLL).max_attempts(10));
    sleep(Duration::from_millis(15)).await;
    assert_eq!(dispatches.load(Ordering::SeqCst), 2);

    listener.stop();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(dispatches.load(Ordering::SeqCst), 2);
    assert_eq!(listener.status(), ListenerStatus::Initial);
    assert_eq!(
        recorder.statuses(),
        vec![ListenerStatus::Connecting, ListenerStatus::Initial]
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_timeout_gets_a_fresh_budget() {
    let tree = NodeTree::new();
    let context = Context::with_initial("volume", 4u8);
    let (options, recorder) = recorded_options::<u8>(&tree, tree.root());
    let listener = context.listen(options.poll_interval(POLL).max_attempts(2));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(listener.status(), ListenerStatus::Timeout);

    let _provider = context.provide(tree.clone(), tree.root(), None).unwrap();
    listener.start();

    assert!(listener.is_connected());
    assert_eq!(listener.attempts(), 0);
    assert_eq!(recorder.values(), vec![(4, 4)]);
    assert_eq!(
        recorder.statuses(),
        vec![
            ListenerStatus::Connecting,
            ListenerStatus::Timeout,
            ListenerStatus::Connecting,
            ListenerStatus::Connected
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_a_polling_listener_ends_its_ticks() {
    let tree = NodeTree::new();
    let context: Context<u32> = Context::new("missing");
    let dispatches = count_dispatches(&tree, tree.root(), "missing");

    let (options, _recorder) = recorded_options::<u32>(&tree, tree.root());
    let listener = context.listen(options.poll_interval(POLL).max_attempts(10));
    sleep(Duration::from_millis(15)).await;
    drop(listener);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(dispatches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_listener_config_drives_retry() {
    let tree = NodeTree::new();
    let context: Context<u32> = Context::new("missing");
    let config = tether::ListenerConfig {
        poll_interval_ms: 10,
        max_attempts: 4,
    };
    let dispatches = count_dispatches(&tree, tree.root(), "missing");

    let (options, _recorder) = recorded_options::<u32>(&tree, tree.root());
    let listener = context.listen(options.with_config(&config));
    assert_eq!(listener.poll_interval(), POLL);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.status(), ListenerStatus::Timeout);
    assert_eq!(dispatches.load(Ordering::SeqCst), 4);
}
