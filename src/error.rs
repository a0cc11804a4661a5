//! Error types for the tether context system.
//!
//! The connection protocol itself never returns errors across the
//! provider/listener boundary; failures there are reported through
//! [`ListenerStatus`](crate::listener::ListenerStatus). These types cover the
//! substrate and the ambient layers (configuration, global registry).

use crate::tree::NodeId;
use thiserror::Error;

/// Node tree substrate errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("The root node cannot be detached or moved")]
    RootImmutable,

    #[error("Moving {node} under {parent} would create a cycle")]
    Cycle { node: NodeId, parent: NodeId },
}

/// Context-level errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Channel '{channel}' is already provided with a different value type")]
    TypeMismatch { channel: String },

    #[error("Channel '{channel}' has no initial value to provide")]
    MissingInitialValue { channel: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::ConfigError(err.to_string())
    }
}
