//! Node identity and per-node records

use crate::tree::signal::{Handler, HandlerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a node within one [`NodeTree`](crate::tree::NodeTree)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifier of a tree instance, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) u64);

impl TreeId {
    pub(crate) fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TreeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Registered handler together with its id
#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub(crate) id: HandlerId,
    pub(crate) handler: Handler,
}

/// Parent pointer, ordered children and named-signal handlers of one node
#[derive(Default)]
pub(crate) struct NodeRecord {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) handlers: HashMap<String, Vec<HandlerEntry>>,
}

impl NodeRecord {
    pub(crate) fn with_parent(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            ..Self::default()
        }
    }
}
