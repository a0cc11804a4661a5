//! Listener State Machine
//!
//! A listener asks the tree for a named context by dispatching a
//! [`ConnectionRequest`] at its own node. Until some provider claims the
//! request it keeps retrying on a fixed poll interval, up to a retry budget.
//!
//! Status transitions:
//!
//! ```text
//! Initial -> Connecting -> Connected
//!                      \-> Timeout
//! Connected -> Connecting      (provider torn down, reconnect handoff)
//! any -> Initial               (stop)
//! ```
//!
//! Attempt counting: the immediate try made by [`Listener::start`] is attempt 1
//! and each poll tick is one more, so a budget of `N` means exactly `N`
//! dispatches. Without polling the budget is a single try.

use crate::request::{
    ConnectionRequest, DisconnectResolver, DisconnectSignal, OnChange, OnConnect, OnDisconnect,
};
use crate::tree::{NodeId, NodeTree};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Connection status of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerStatus {
    /// Never attempted, or stopped
    Initial,
    /// Trying to connect or reconnect
    Connecting,
    /// Subscribed to a provider
    Connected,
    /// Gave up after exhausting the retry budget
    Timeout,
}

impl ListenerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerStatus::Initial => "Initial",
            ListenerStatus::Connecting => "Connecting",
            ListenerStatus::Connected => "Connected",
            ListenerStatus::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for ListenerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry defaults for listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Delay between connection attempts (milliseconds). Zero disables polling.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub type OnStatus = Arc<dyn Fn(ListenerStatus) + Send + Sync>;

/// Everything needed to build a [`Listener`] except the channel name
pub struct ListenerOptions<T> {
    pub tree: Arc<NodeTree>,
    pub node: NodeId,
    /// Called for the initial value (as `(value, value)`) and every change
    pub on_change: OnChange<T>,
    pub on_status: Option<OnStatus>,
    pub poll_interval: Duration,
    /// Zero falls back to [`DEFAULT_MAX_ATTEMPTS`]
    pub max_attempts: u32,
}

impl<T> ListenerOptions<T> {
    pub fn new<F>(tree: Arc<NodeTree>, node: NodeId, on_change: F) -> Self
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        let defaults = ListenerConfig::default();
        Self {
            tree,
            node,
            on_change: Arc::new(on_change),
            on_status: None,
            poll_interval: defaults.poll_interval(),
            max_attempts: defaults.max_attempts,
        }
    }

    pub fn on_status<F>(mut self, on_status: F) -> Self
    where
        F: Fn(ListenerStatus) + Send + Sync + 'static,
    {
        self.on_status = Some(Arc::new(on_status));
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Take retry settings from configuration
    pub fn with_config(self, config: &ListenerConfig) -> Self {
        self.poll_interval(config.poll_interval())
            .max_attempts(config.max_attempts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Continue,
    Finished,
}

struct ListenerState {
    status: ListenerStatus,
    attempts: u32,
    /// Bumped by every start/stop so ticks from an older cycle do nothing
    cycle: u64,
    resolver: Option<DisconnectResolver>,
    ticker: Option<JoinHandle<()>>,
}

impl ListenerState {
    fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

struct ListenerInner<T> {
    channel: String,
    tree: Arc<NodeTree>,
    node: NodeId,
    on_change: OnChange<T>,
    on_status: Option<OnStatus>,
    poll_interval: Duration,
    max_attempts: u32,
    /// Serializes state machine steps and status callbacks; re-entrant so a
    /// callback may call back into the listener on the same thread.
    gate: ReentrantMutex<()>,
    state: Mutex<ListenerState>,
}

impl<T: Clone + Send + Sync + 'static> ListenerInner<T> {
    fn polling_enabled(&self) -> bool {
        if self.poll_interval.is_zero() || self.max_attempts <= 1 {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(
                channel = %self.channel,
                node = %self.node,
                "No tokio runtime available, listener will not poll"
            );
            return false;
        }
        true
    }

    fn start(self: &Arc<Self>) {
        let _gate = self.gate.lock();
        let (cycle, superseded) = {
            let mut state = self.state.lock();
            state.cycle += 1;
            state.attempts = 0;
            state.cancel_ticker();
            (state.cycle, state.resolver.take())
        };
        drop(superseded);
        self.set_status(ListenerStatus::Connecting);

        let polling = self.polling_enabled();
        let budget = if polling { self.max_attempts } else { 1 };
        if self.try_connect(cycle, budget) == Tick::Continue && polling {
            self.spawn_ticker(cycle);
        }
    }

    fn spawn_ticker(self: &Arc<Self>, cycle: u64) {
        let weak = Arc::downgrade(self);
        let period = self.poll_interval;
        let budget = self.max_attempts;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.try_connect(cycle, budget) == Tick::Finished {
                    break;
                }
            }
        });

        let mut state = self.state.lock();
        if state.cycle == cycle && state.status == ListenerStatus::Connecting {
            state.ticker = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// One connection attempt
    fn try_connect(self: &Arc<Self>, cycle: u64, budget: u32) -> Tick {
        let _gate = self.gate.lock();
        {
            let mut state = self.state.lock();
            if state.cycle != cycle || state.status == ListenerStatus::Timeout {
                return Tick::Finished;
            }
            if state.status == ListenerStatus::Connected {
                state.cancel_ticker();
                return Tick::Finished;
            }
        }

        let request = self.request();
        match self
            .tree
            .dispatch(self.node, &self.channel, Arc::new(request))
        {
            Ok(report) => trace!(
                channel = %self.channel,
                node = %self.node,
                invoked = report.invoked,
                "Dispatched connection request"
            ),
            Err(e) => warn!(
                channel = %self.channel,
                node = %self.node,
                error = %e,
                "Connection request could not be dispatched"
            ),
        }

        let attempts = {
            let mut state = self.state.lock();
            if state.cycle != cycle {
                return Tick::Finished;
            }
            if state.status == ListenerStatus::Connected {
                state.cancel_ticker();
                return Tick::Finished;
            }
            state.attempts += 1;
            if state.attempts < budget {
                return Tick::Continue;
            }
            state.cancel_ticker();
            state.attempts
        };

        warn!(
            channel = %self.channel,
            node = %self.node,
            attempts,
            "Gave up waiting for a provider"
        );
        self.set_status(ListenerStatus::Timeout);
        Tick::Finished
    }

    fn request(self: &Arc<Self>) -> ConnectionRequest<T> {
        let on_connect: OnConnect<T> = {
            let weak = Arc::downgrade(self);
            Arc::new(move |value: T| match weak.upgrade() {
                Some(inner) => inner.on_connect(value),
                None => settled_signal(),
            })
        };
        let on_change: OnChange<T> = {
            let weak: Weak<Self> = Arc::downgrade(self);
            Arc::new(move |value: &T, previous: &T| {
                if let Some(inner) = weak.upgrade() {
                    (inner.on_change)(value, previous);
                }
            })
        };
        let on_disconnect: OnDisconnect = {
            let weak = Arc::downgrade(self);
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_disconnect();
                }
            })
        };
        ConnectionRequest::new(on_connect, on_change, on_disconnect)
    }

    fn on_connect(self: &Arc<Self>, value: T) -> DisconnectSignal {
        let _gate = self.gate.lock();
        let (resolver, signal) = oneshot::channel();
        let superseded = self.state.lock().resolver.replace(resolver);
        // Dropping an older resolver settles that provider's subscription.
        drop(superseded);

        info!(channel = %self.channel, node = %self.node, "Listener connected");
        self.set_status(ListenerStatus::Connected);
        (self.on_change)(&value, &value);
        signal
    }

    fn on_disconnect(self: &Arc<Self>) {
        let _gate = self.gate.lock();
        let was_connected = {
            let mut state = self.state.lock();
            state.resolver = None;
            state.status == ListenerStatus::Connected
        };
        if !was_connected {
            return;
        }
        info!(
            channel = %self.channel,
            node = %self.node,
            "Provider went away, reconnecting"
        );
        self.start();
    }

    fn stop(&self) {
        let _gate = self.gate.lock();
        let resolver = {
            let mut state = self.state.lock();
            state.cycle += 1;
            state.cancel_ticker();
            state.resolver.take()
        };
        if let Some(resolver) = resolver {
            let _ = resolver.send(());
        }
        debug!(channel = %self.channel, node = %self.node, "Listener stopped");
        self.set_status(ListenerStatus::Initial);
    }

    fn set_status(&self, status: ListenerStatus) {
        self.state.lock().status = status;
        debug!(channel = %self.channel, node = %self.node, %status, "Listener status changed");
        if let Some(on_status) = &self.on_status {
            on_status(status);
        }
    }
}

impl<T> Drop for ListenerInner<T> {
    fn drop(&mut self) {
        self.state.get_mut().cancel_ticker();
    }
}

/// A signal that has already settled, handed to providers when the listener
/// no longer exists.
fn settled_signal() -> DisconnectSignal {
    let (_resolver, signal) = oneshot::channel();
    signal
}

/// Consumer side of a context channel
pub struct Listener<T> {
    inner: Arc<ListenerInner<T>>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Listener<T> {
    pub fn new(channel: impl Into<String>, options: ListenerOptions<T>) -> Self {
        let max_attempts = if options.max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            options.max_attempts
        };
        Self {
            inner: Arc::new(ListenerInner {
                channel: channel.into(),
                tree: options.tree,
                node: options.node,
                on_change: options.on_change,
                on_status: options.on_status,
                poll_interval: options.poll_interval,
                max_attempts,
                gate: ReentrantMutex::new(()),
                state: Mutex::new(ListenerState {
                    status: ListenerStatus::Initial,
                    attempts: 0,
                    cycle: 0,
                    resolver: None,
                    ticker: None,
                }),
            }),
        }
    }

    /// Start (or restart) connecting.
    ///
    /// The first attempt happens before this returns; further attempts are
    /// scheduled on the current tokio runtime.
    ///
    /// Retrying needs that runtime. Called outside one, the listener makes a
    /// single attempt and goes to [`ListenerStatus::Timeout`] if it fails,
    /// whatever `poll_interval` and `max_attempts` say. The same holds for a
    /// zero poll interval or a budget of one attempt.
    pub fn start(&self) -> &Self {
        self.inner.start();
        self
    }

    /// Cancel polling, end any subscription and return to `Initial`
    pub fn stop(&self) -> &Self {
        self.inner.stop();
        self
    }

    pub fn status(&self) -> ListenerStatus {
        self.inner.state.lock().status
    }

    /// Failed attempts in the current cycle
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ListenerStatus::Connected
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.inner.max_attempts
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("channel", &self.inner.channel)
            .field("node", &self.inner.node)
            .field("status", &self.inner.state.lock().status)
            .finish()
    }
}
