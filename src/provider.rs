//! Provider Registry
//!
//! A provider owns the current value of one channel at one node and the ordered
//! list of listeners subscribed to it. It claims connection requests that reach
//! its node, halting their propagation so nested providers shadow outer ones.

use crate::error::ContextError;
use crate::request::{ConnectionRequest, DisconnectSignal, RequestId};
use crate::tree::{Handler, NodeId, NodeTree, Outcome, Signal};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, info, trace, warn};

/// A literal value, or a producer evaluated each time the value is read
pub enum InitialValue<T> {
    Value(T),
    Producer(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> InitialValue<T> {
    pub fn producer<F>(producer: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        InitialValue::Producer(Arc::new(producer))
    }

    pub fn resolve(&self) -> T {
        match self {
            InitialValue::Value(value) => value.clone(),
            InitialValue::Producer(producer) => producer(),
        }
    }
}

impl<T> From<T> for InitialValue<T> {
    fn from(value: T) -> Self {
        InitialValue::Value(value)
    }
}

impl<T: Clone> Clone for InitialValue<T> {
    fn clone(&self) -> Self {
        match self {
            InitialValue::Value(value) => InitialValue::Value(value.clone()),
            InitialValue::Producer(producer) => InitialValue::Producer(Arc::clone(producer)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for InitialValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            InitialValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Everything needed to build a [`Provider`] except the channel name
pub struct ProviderOptions<T> {
    pub tree: Arc<NodeTree>,
    pub node: NodeId,
    pub initial: InitialValue<T>,
}

impl<T> ProviderOptions<T> {
    pub fn new(tree: Arc<NodeTree>, node: NodeId, initial: impl Into<InitialValue<T>>) -> Self {
        Self {
            tree,
            node,
            initial: initial.into(),
        }
    }
}

/// One active subscription
struct Subscription<T> {
    request: ConnectionRequest<T>,
    /// `None` while `on_connect` is still running
    signal: Option<DisconnectSignal>,
}

impl<T> Subscription<T> {
    fn is_settled(&mut self) -> bool {
        match &mut self.signal {
            None => false,
            Some(signal) => !matches!(signal.try_recv(), Err(TryRecvError::Empty)),
        }
    }
}

struct ProviderState<T> {
    current: InitialValue<T>,
    subscriptions: Vec<Subscription<T>>,
    handler: Option<crate::tree::HandlerId>,
}

impl<T> ProviderState<T> {
    /// Drop subscriptions whose listener has ended them
    fn sweep(&mut self, channel: &str) {
        let before = self.subscriptions.len();
        self.subscriptions.retain_mut(|subscription| !subscription.is_settled());
        let removed = before - self.subscriptions.len();
        if removed > 0 {
            debug!(channel, removed, "Removed ended subscriptions");
        }
    }
}

struct ProviderInner<T> {
    channel: String,
    tree: Arc<NodeTree>,
    node: NodeId,
    state: Mutex<ProviderState<T>>,
}

impl<T: Clone + Send + Sync + 'static> ProviderInner<T> {
    fn handle(&self, signal: &Signal) -> Outcome {
        let Some(request) = signal.payload::<ConnectionRequest<T>>() else {
            warn!(
                channel = %self.channel,
                node = %self.node,
                origin = %signal.origin(),
                "Ignoring connection request with a different value type"
            );
            return Outcome::Continue;
        };
        self.claim(request.clone(), signal.origin());
        Outcome::Stop
    }

    fn claim(&self, request: ConnectionRequest<T>, origin: NodeId) {
        let current = {
            let mut state = self.state.lock();
            state.sweep(&self.channel);
            state.subscriptions.push(Subscription {
                request: request.clone(),
                signal: None,
            });
            state.current.clone()
        };
        debug!(
            channel = %self.channel,
            node = %self.node,
            %origin,
            request = request.id().as_u64(),
            "Claimed connection request"
        );

        let signal = request.connect(current.resolve());

        let mut state = self.state.lock();
        if let Some(subscription) = state
            .subscriptions
            .iter_mut()
            .find(|subscription| subscription.request.id() == request.id())
        {
            subscription.signal = Some(signal);
        }
    }
}

impl<T> Drop for ProviderInner<T> {
    /// Same teardown as [`Provider::stop`] for the last handle going away
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(handler) = state.handler.take() {
            self.tree.remove_handler(self.node, &self.channel, handler);
        }
        state.sweep(&self.channel);
        let subscriptions = std::mem::take(&mut state.subscriptions);
        if !subscriptions.is_empty() {
            debug!(
                channel = %self.channel,
                node = %self.node,
                notified = subscriptions.len(),
                "Provider dropped"
            );
        }
        for subscription in &subscriptions {
            subscription.request.disconnect();
        }
    }
}

/// Source of a context channel for the subtree below its node
pub struct Provider<T> {
    inner: Arc<ProviderInner<T>>,
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Provider<T> {
    pub fn new(channel: impl Into<String>, options: ProviderOptions<T>) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                channel: channel.into(),
                tree: options.tree,
                node: options.node,
                state: Mutex::new(ProviderState {
                    current: options.initial,
                    subscriptions: Vec::new(),
                    handler: None,
                }),
            }),
        }
    }

    /// Start claiming connection requests that reach this node.
    ///
    /// Starting an already started provider does nothing.
    pub fn start(&self) -> Result<&Self, ContextError> {
        let mut state = self.inner.state.lock();
        if state.handler.is_some() {
            debug!(channel = %self.inner.channel, node = %self.inner.node, "Provider already started");
            return Ok(self);
        }

        let weak = Arc::downgrade(&self.inner);
        let handler: Handler = Arc::new(move |signal: &Signal| match weak.upgrade() {
            Some(inner) => inner.handle(signal),
            None => Outcome::Continue,
        });
        let id = self
            .inner
            .tree
            .add_handler(self.inner.node, &self.inner.channel, handler)?;
        state.handler = Some(id);

        info!(channel = %self.inner.channel, node = %self.inner.node, "Provider started");
        Ok(self)
    }

    /// Stop claiming requests and hand every subscribed listener back to its
    /// own reconnect loop, oldest subscription first.
    pub fn stop(&self) -> &Self {
        let (handler, subscriptions) = {
            let mut state = self.inner.state.lock();
            state.sweep(&self.inner.channel);
            (
                state.handler.take(),
                std::mem::take(&mut state.subscriptions),
            )
        };

        if let Some(handler) = handler {
            self.inner
                .tree
                .remove_handler(self.inner.node, &self.inner.channel, handler);
        }

        info!(
            channel = %self.inner.channel,
            node = %self.inner.node,
            notified = subscriptions.len(),
            "Provider stopped"
        );
        for subscription in &subscriptions {
            subscription.request.disconnect();
        }
        self
    }

    /// Replace the value and push it to every subscriber in connection order
    pub fn set_context(&self, next: T) {
        let (previous, targets) = {
            let mut state = self.inner.state.lock();
            state.sweep(&self.inner.channel);
            let previous = std::mem::replace(&mut state.current, InitialValue::Value(next.clone()));
            let targets: Vec<ConnectionRequest<T>> = state
                .subscriptions
                .iter()
                .map(|subscription| subscription.request.clone())
                .collect();
            (previous, targets)
        };
        let previous = previous.resolve();

        trace!(
            channel = %self.inner.channel,
            node = %self.inner.node,
            subscribers = targets.len(),
            "Publishing context change"
        );
        for request in &targets {
            request.change(&next, &previous);
        }
    }

    /// Current value, without side effects
    pub fn context(&self) -> T {
        let current = self.inner.state.lock().current.clone();
        current.resolve()
    }

    /// Active subscriptions in connection order
    pub fn subscriptions(&self) -> Vec<RequestId> {
        let mut state = self.inner.state.lock();
        state.sweep(&self.inner.channel);
        state
            .subscriptions
            .iter()
            .map(|subscription| subscription.request.id())
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.sweep(&self.inner.channel);
        state.subscriptions.len()
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.lock().handler.is_some()
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }
}

impl<T> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("channel", &self.inner.channel)
            .field("node", &self.inner.node)
            .finish_non_exhaustive()
    }
}
