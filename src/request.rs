//! Connection Request
//!
//! The payload of one upward connection signal: three callbacks that together
//! form the contract between a listener and whichever provider claims it.
//!
//! A claiming provider must:
//!  - call `on_connect` right away and keep the returned [`DisconnectSignal`]
//!    until it settles, which is when the listener ends the subscription
//!  - call `on_change` whenever its value changes
//!  - call `on_disconnect` when it is torn down while still subscribed

use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Receiving half of a listener's pending-disconnect channel.
///
/// Settles exactly once: when the listener sends on it (explicit stop) or
/// drops the sending half (superseded connection).
pub type DisconnectSignal = oneshot::Receiver<()>;

/// Sending half kept by a connected listener
pub type DisconnectResolver = oneshot::Sender<()>;

pub type OnConnect<T> = Arc<dyn Fn(T) -> DisconnectSignal + Send + Sync>;
pub type OnChange<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;
pub type OnDisconnect = Arc<dyn Fn() + Send + Sync>;

/// Identity of one connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Generate the next request ID
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RequestId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Callback bundle carried by a connection signal
pub struct ConnectionRequest<T> {
    id: RequestId,
    on_connect: OnConnect<T>,
    on_change: OnChange<T>,
    on_disconnect: OnDisconnect,
}

impl<T> ConnectionRequest<T> {
    pub fn new(on_connect: OnConnect<T>, on_change: OnChange<T>, on_disconnect: OnDisconnect) -> Self {
        Self {
            id: RequestId::next(),
            on_connect,
            on_change,
            on_disconnect,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn connect(&self, value: T) -> DisconnectSignal {
        (self.on_connect)(value)
    }

    pub fn change(&self, value: &T, previous: &T) {
        (self.on_change)(value, previous)
    }

    pub fn disconnect(&self) {
        (self.on_disconnect)()
    }
}

impl<T> Clone for ConnectionRequest<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            on_connect: Arc::clone(&self.on_connect),
            on_change: Arc::clone(&self.on_change),
            on_disconnect: Arc::clone(&self.on_disconnect),
        }
    }
}

impl<T> PartialEq for ConnectionRequest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ConnectionRequest<T> {}

impl<T> fmt::Debug for ConnectionRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
