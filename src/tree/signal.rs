//! Named signals carried upward through the tree

use crate::tree::node::NodeId;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased signal payload
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Signal handler. Returning [`Outcome::Stop`] halts propagation after the
/// current node.
pub type Handler = Arc<dyn Fn(&Signal) -> Outcome + Send + Sync>;

/// Propagation decision returned by a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Stop,
}

/// Handler registration id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        HandlerId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A named signal dispatched at `origin`
pub struct Signal {
    name: String,
    origin: NodeId,
    payload: Payload,
}

impl Signal {
    pub(crate) fn new(name: impl Into<String>, origin: NodeId, payload: Payload) -> Self {
        Self {
            name: name.into(),
            origin,
            payload,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node the signal was dispatched at
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// Borrow the payload as `P`, if it has that type
    pub fn payload<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Summary of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of handler invocations
    pub invoked: usize,
    /// Node at which propagation was halted, if any
    pub halted_at: Option<NodeId>,
}

impl DispatchReport {
    pub fn halted(&self) -> bool {
        self.halted_at.is_some()
    }
}
