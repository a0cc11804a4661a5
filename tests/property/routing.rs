//! Property-based tests for request routing and fan-out

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tether::{Context, ListenerOptions, ListenerStatus, NodeTree};

/// The deepest provider on the path from the root to the listener claims it
#[test]
fn test_nearest_provider_wins_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &proptest::collection::vec(any::<bool>(), 1..12),
            |placements| {
                let tree = NodeTree::new();
                let context: Context<usize> = Context::new("depth");
                let mut parent = tree.root();
                let mut providers = Vec::new();
                for (depth, has_provider) in placements.iter().enumerate() {
                    let node = tree.insert_child(parent).unwrap();
                    if *has_provider {
                        providers.push((
                            depth,
                            context
                                .provide(tree.clone(), node, Some(depth.into()))
                                .unwrap(),
                        ));
                    }
                    parent = node;
                }

                let seen = Arc::new(Mutex::new(Vec::new()));
                let sink = Arc::clone(&seen);
                let listener = context.listen(
                    ListenerOptions::new(tree.clone(), parent, move |value: &usize, _: &usize| {
                        sink.lock().push(*value)
                    })
                    .poll_interval(Duration::ZERO),
                );

                match providers.last() {
                    Some((depth, _)) => {
                        assert_eq!(listener.status(), ListenerStatus::Connected);
                        assert_eq!(*seen.lock(), vec![*depth]);
                        for (other, provider) in &providers {
                            let expected = usize::from(other == depth);
                            assert_eq!(provider.subscription_count(), expected);
                        }
                    }
                    None => {
                        assert_eq!(listener.status(), ListenerStatus::Timeout);
                        assert!(seen.lock().is_empty());
                    }
                }

                Ok(())
            },
        )
        .unwrap();
}

/// Updates reach subscribers in the order they connected, whatever their depth
#[test]
fn test_fan_out_order_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(proptest::collection::vec(0usize..5, 1..10), any::<u16>()),
            |(depths, next)| {
                let tree = NodeTree::new();
                let context = Context::with_initial("value", 0u16);
                let provider = context.provide(tree.clone(), tree.root(), None).unwrap();

                let log = Arc::new(Mutex::new(Vec::new()));
                let mut listeners = Vec::new();
                for (index, depth) in depths.iter().enumerate() {
                    let mut node = tree.root();
                    for _ in 0..*depth {
                        node = tree.insert_child(node).unwrap();
                    }
                    let sink = Arc::clone(&log);
                    listeners.push(context.listen(
                        ListenerOptions::new(tree.clone(), node, move |value: &u16, previous: &u16| {
                            sink.lock().push((index, *value, *previous))
                        })
                        .poll_interval(Duration::ZERO),
                    ));
                }
                log.lock().clear();

                provider.set_context(next);
                let expected: Vec<_> = (0..depths.len()).map(|index| (index, next, 0)).collect();
                assert_eq!(*log.lock(), expected);

                Ok(())
            },
        )
        .unwrap();
}

/// Stopped listeners are skipped; the rest keep their relative order
#[test]
fn test_unsubscribe_preserves_order_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &proptest::collection::vec(any::<bool>(), 1..10),
            |stopped| {
                let tree = NodeTree::new();
                let context = Context::with_initial("value", 0u8);
                let provider = context.provide(tree.clone(), tree.root(), None).unwrap();

                let log = Arc::new(Mutex::new(Vec::new()));
                let listeners: Vec<_> = (0..stopped.len())
                    .map(|index| {
                        let sink = Arc::clone(&log);
                        context.listen(
                            ListenerOptions::new(tree.clone(), tree.root(), move |_: &u8, _: &u8| {
                                sink.lock().push(index)
                            })
                            .poll_interval(Duration::ZERO),
                        )
                    })
                    .collect();
                log.lock().clear();

                for (listener, stop) in listeners.iter().zip(&stopped) {
                    if *stop {
                        listener.stop();
                    }
                }
                provider.set_context(1);

                let expected: Vec<usize> = stopped
                    .iter()
                    .enumerate()
                    .filter(|(_, stop)| !**stop)
                    .map(|(index, _)| index)
                    .collect();
                assert_eq!(*log.lock(), expected);
                assert_eq!(provider.subscription_count(), expected.len());

                Ok(())
            },
        )
        .unwrap();
}
