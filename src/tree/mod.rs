//! Node Tree Substrate
//!
//! A synchronous, in-process hierarchy of nodes. Each node has a parent pointer
//! and a set of handlers keyed by signal name. A signal dispatched at a node is
//! observed by that node and then by its ancestors, nearest first, until a
//! handler asks to stop.

pub mod node;
pub mod signal;

pub use node::{NodeId, TreeId};
pub use signal::{DispatchReport, Handler, HandlerId, Outcome, Payload, Signal};

use crate::error::TreeError;
use node::{HandlerEntry, NodeRecord};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Tree of addressable nodes supporting upward signal dispatch
pub struct NodeTree {
    id: TreeId,
    root: NodeId,
    next_node: AtomicU64,
    nodes: RwLock<HashMap<NodeId, NodeRecord>>,
}

impl NodeTree {
    /// Create a tree containing only its root node
    pub fn new() -> Arc<Self> {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, NodeRecord::with_parent(None));
        Arc::new(Self {
            id: TreeId::next(),
            root,
            next_node: AtomicU64::new(1),
            nodes: RwLock::new(nodes),
        })
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.read().contains_key(&node)
    }

    /// Parent of `node`, `None` for the root or an unknown node
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.read().get(&node).and_then(|record| record.parent)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .read()
            .get(&node)
            .map(|record| record.children.clone())
            .unwrap_or_default()
    }

    /// Append a new child under `parent`
    pub fn insert_child(&self, parent: NodeId) -> Result<NodeId, TreeError> {
        let mut nodes = self.nodes.write();
        let parent_record = nodes
            .get_mut(&parent)
            .ok_or(TreeError::NodeNotFound(parent))?;
        let child = NodeId(self.next_node.fetch_add(1, Ordering::Relaxed));
        parent_record.children.push(child);
        nodes.insert(child, NodeRecord::with_parent(Some(parent)));
        trace!(%parent, %child, "Inserted node");
        Ok(child)
    }

    /// Move `node` (with its subtree and handlers) under `new_parent`
    pub fn reparent(&self, node: NodeId, new_parent: NodeId) -> Result<(), TreeError> {
        if node == self.root {
            return Err(TreeError::RootImmutable);
        }
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&node) {
            return Err(TreeError::NodeNotFound(node));
        }
        if !nodes.contains_key(&new_parent) {
            return Err(TreeError::NodeNotFound(new_parent));
        }

        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == node {
                return Err(TreeError::Cycle {
                    node,
                    parent: new_parent,
                });
            }
            cursor = nodes.get(&current).and_then(|record| record.parent);
        }

        let old_parent = nodes.get(&node).and_then(|record| record.parent);
        if let Some(old_parent) = old_parent {
            if let Some(record) = nodes.get_mut(&old_parent) {
                record.children.retain(|child| *child != node);
            }
        }
        if let Some(record) = nodes.get_mut(&new_parent) {
            record.children.push(node);
        }
        if let Some(record) = nodes.get_mut(&node) {
            record.parent = Some(new_parent);
        }
        debug!(%node, %new_parent, "Reparented node");
        Ok(())
    }

    /// Remove `node` and its whole subtree, including registered handlers.
    ///
    /// Returns the number of removed nodes.
    pub fn detach(&self, node: NodeId) -> Result<usize, TreeError> {
        if node == self.root {
            return Err(TreeError::RootImmutable);
        }
        let mut nodes = self.nodes.write();
        let parent = nodes
            .get(&node)
            .ok_or(TreeError::NodeNotFound(node))?
            .parent;
        if let Some(parent) = parent {
            if let Some(record) = nodes.get_mut(&parent) {
                record.children.retain(|child| *child != node);
            }
        }

        let mut removed = 0;
        let mut pending = VecDeque::from([node]);
        while let Some(current) = pending.pop_front() {
            if let Some(record) = nodes.remove(&current) {
                pending.extend(record.children);
                removed += 1;
            }
        }
        debug!(%node, removed, "Detached subtree");
        Ok(removed)
    }

    /// `node` followed by its ancestors, nearest first
    pub fn ancestors(&self, node: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let nodes = self.nodes.read();
        let mut path = Vec::new();
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            let record = nodes
                .get(&current)
                .ok_or(TreeError::NodeNotFound(current))?;
            path.push(current);
            cursor = record.parent;
        }
        Ok(path)
    }

    /// Register `handler` for signals named `name` at `node`
    pub fn add_handler(
        &self,
        node: NodeId,
        name: &str,
        handler: Handler,
    ) -> Result<HandlerId, TreeError> {
        let mut nodes = self.nodes.write();
        let record = nodes.get_mut(&node).ok_or(TreeError::NodeNotFound(node))?;
        let id = HandlerId::next();
        record
            .handlers
            .entry(name.to_string())
            .or_default()
            .push(HandlerEntry { id, handler });
        trace!(%node, signal = name, "Added handler");
        Ok(id)
    }

    /// Unregister a handler. Returns `false` if it was not registered.
    pub fn remove_handler(&self, node: NodeId, name: &str, id: HandlerId) -> bool {
        let mut nodes = self.nodes.write();
        let Some(record) = nodes.get_mut(&node) else {
            return false;
        };
        let Some(entries) = record.handlers.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            record.handlers.remove(name);
        }
        removed
    }

    pub fn handler_count(&self, node: NodeId, name: &str) -> usize {
        self.nodes
            .read()
            .get(&node)
            .and_then(|record| record.handlers.get(name))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Dispatch a signal at `origin` and carry it upward.
    ///
    /// All handlers of a node run in registration order. If any of them returns
    /// [`Outcome::Stop`], no further ancestor observes the signal. Handlers run
    /// without any tree lock held, so they may mutate the tree or dispatch again.
    pub fn dispatch(
        &self,
        origin: NodeId,
        name: &str,
        payload: Payload,
    ) -> Result<DispatchReport, TreeError> {
        let path = self.ancestors(origin)?;
        let signal = Signal::new(name, origin, payload);
        let mut report = DispatchReport::default();

        for node in path {
            let handlers = self.snapshot_handlers(node, name);
            let mut stop = false;
            for entry in handlers {
                report.invoked += 1;
                if (entry.handler)(&signal) == Outcome::Stop {
                    stop = true;
                }
            }
            if stop {
                report.halted_at = Some(node);
                break;
            }
        }

        trace!(
            %origin,
            signal = name,
            invoked = report.invoked,
            halted = report.halted(),
            "Dispatched signal"
        );
        Ok(report)
    }

    fn snapshot_handlers(&self, node: NodeId, name: &str) -> Vec<HandlerEntry> {
        self.nodes
            .read()
            .get(&node)
            .and_then(|record| record.handlers.get(name))
            .cloned()
            .unwrap_or_default()
    }
}
