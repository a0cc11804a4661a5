//! Named context handles.
//!
//! A [`Context`] fixes the channel name (and optionally a default initial
//! value) once, so providers and listeners for it can be built without
//! repeating either.

use crate::error::ContextError;
use crate::global;
use crate::listener::{Listener, ListenerOptions};
use crate::provider::{InitialValue, Provider, ProviderOptions};
use crate::tree::{NodeId, NodeTree};
use std::fmt;
use std::sync::Arc;

pub struct Context<T> {
    name: Arc<str>,
    initial: Option<InitialValue<T>>,
}

impl<T: Clone> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            initial: self.initial.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Context<T> {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            initial: None,
        }
    }

    /// Context whose providers start from `initial` unless given their own value
    pub fn with_initial(name: impl AsRef<str>, initial: impl Into<InitialValue<T>>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            initial: Some(initial.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial(&self) -> Option<&InitialValue<T>> {
        self.initial.as_ref()
    }

    /// Build a provider at `node`, not yet started
    pub fn provider(
        &self,
        tree: Arc<NodeTree>,
        node: NodeId,
        initial: Option<InitialValue<T>>,
    ) -> Result<Provider<T>, ContextError> {
        let initial = initial
            .or_else(|| self.initial.clone())
            .ok_or_else(|| ContextError::MissingInitialValue {
                channel: self.name.to_string(),
            })?;
        Ok(Provider::new(
            self.name.as_ref(),
            ProviderOptions::new(tree, node, initial),
        ))
    }

    /// Build and start a provider at `node`
    pub fn provide(
        &self,
        tree: Arc<NodeTree>,
        node: NodeId,
        initial: Option<InitialValue<T>>,
    ) -> Result<Provider<T>, ContextError> {
        let provider = self.provider(tree, node, initial)?;
        provider.start()?;
        Ok(provider)
    }

    /// Build a listener, not yet started
    pub fn listener(&self, options: ListenerOptions<T>) -> Listener<T> {
        Listener::new(self.name.as_ref(), options)
    }

    /// Build and start a listener
    pub fn listen(&self, options: ListenerOptions<T>) -> Listener<T> {
        let listener = self.listener(options);
        listener.start();
        listener
    }

    /// Provide this context at the root of `tree`.
    ///
    /// The first call creates and starts the root provider (from `next`, or the
    /// context default); later calls update it with `next`.
    pub fn provide_globally(
        &self,
        tree: &Arc<NodeTree>,
        next: Option<T>,
    ) -> Result<Provider<T>, ContextError> {
        global::provide_globally(tree, &self.name, self.initial.clone(), next)
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("has_initial", &self.initial.is_some())
            .finish()
    }
}
