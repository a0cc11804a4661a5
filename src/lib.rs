//! Tether: tree-scoped context discovery
//!
//! Providers and listeners that live in the same [`NodeTree`](tree::NodeTree)
//! find each other without holding references to one another. A listener
//! dispatches a connection request at its node; the request travels upward
//! until the nearest provider for the same channel claims it; from then on the
//! provider pushes its value, and every change, to the listener until either
//! side disconnects.

pub mod config;
pub mod context;
pub mod error;
pub mod global;
pub mod listener;
pub mod logging;
pub mod provider;
pub mod request;
pub mod tree;

pub use context::Context;
pub use error::{ContextError, TreeError};
pub use listener::{Listener, ListenerConfig, ListenerOptions, ListenerStatus};
pub use provider::{InitialValue, Provider, ProviderOptions};
pub use request::{ConnectionRequest, DisconnectSignal, RequestId};
pub use tree::{NodeId, NodeTree};
