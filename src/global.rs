//! Root-level ("global") providers.
//!
//! A process-wide registry keyed by tree and channel name. Entries are created
//! on first use and live until [`release_global`] is called for them.

use crate::error::ContextError;
use crate::provider::{InitialValue, Provider, ProviderOptions};
use crate::tree::{NodeTree, TreeId};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::info;

struct GlobalEntry {
    provider: Arc<dyn Any + Send + Sync>,
    stop: Box<dyn Fn() + Send + Sync>,
}

type Registry = HashMap<(TreeId, String), GlobalEntry>;

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Provide `channel` at the root of `tree`.
///
/// The first call for a tree and channel creates and starts a provider whose
/// value is `next`, or `initial` when `next` is `None`. Later calls set `next`
/// on that provider (and leave it unchanged for `None`).
pub fn provide_globally<T: Clone + Send + Sync + 'static>(
    tree: &Arc<NodeTree>,
    channel: &str,
    initial: Option<InitialValue<T>>,
    next: Option<T>,
) -> Result<Provider<T>, ContextError> {
    let key = (tree.id(), channel.to_string());
    let provider = {
        let mut registry = registry().lock();
        match registry.get(&key) {
            Some(entry) => downcast::<T>(entry, channel)?,
            None => {
                let initial = next
                    .clone()
                    .map(InitialValue::Value)
                    .or(initial)
                    .ok_or_else(|| ContextError::MissingInitialValue {
                        channel: channel.to_string(),
                    })?;
                let provider = Provider::new(
                    channel,
                    ProviderOptions::new(Arc::clone(tree), tree.root(), initial),
                );
                provider.start()?;
                let stopper = provider.clone();
                registry.insert(
                    key,
                    GlobalEntry {
                        provider: Arc::new(provider.clone()),
                        stop: Box::new(move || {
                            stopper.stop();
                        }),
                    },
                );
                info!(channel, "Created global provider");
                return Ok(provider);
            }
        }
    };

    if let Some(next) = next {
        provider.set_context(next);
    }
    Ok(provider)
}

/// The global provider for `channel` in `tree`, if one exists with value type `T`
pub fn global_provider<T: Clone + Send + Sync + 'static>(
    tree: &NodeTree,
    channel: &str,
) -> Option<Provider<T>> {
    let registry = registry().lock();
    registry
        .get(&(tree.id(), channel.to_string()))
        .and_then(|entry| entry.provider.downcast_ref::<Provider<T>>().cloned())
}

/// Stop and forget the global provider for `channel` in `tree`.
///
/// Returns `false` if there was none.
pub fn release_global(tree: &NodeTree, channel: &str) -> bool {
    let entry = registry().lock().remove(&(tree.id(), channel.to_string()));
    match entry {
        Some(entry) => {
            (entry.stop)();
            info!(channel, "Released global provider");
            true
        }
        None => false,
    }
}

fn downcast<T: Clone + Send + Sync + 'static>(
    entry: &GlobalEntry,
    channel: &str,
) -> Result<Provider<T>, ContextError> {
    entry
        .provider
        .downcast_ref::<Provider<T>>()
        .cloned()
        .ok_or_else(|| ContextError::TypeMismatch {
            channel: channel.to_string(),
        })
}
