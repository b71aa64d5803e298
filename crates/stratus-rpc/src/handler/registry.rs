//! Class name to handler routing.

use super::RpcHandler;
use crate::invoke::RpcClass;
use crate::owner::OwnerToken;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

struct Registration {
    handler: Arc<RpcHandler>,
    owner: Option<OwnerToken>,
}

/// Registered handlers, keyed by class name.
///
/// Lookups hand out an `Arc`, so an invocation that already captured its
/// handler finishes normally even if the handler is unregistered meanwhile.
#[derive(Default)]
pub struct RpcHandlerRegistry {
    handlers: RwLock<HashMap<String, Registration>>,
}

impl RpcHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registration>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registration>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler for its class name.
    ///
    /// Returns false and keeps the existing handler if the class is already taken.
    pub fn register_handler(&self, handler: impl Into<Arc<RpcHandler>>) -> bool {
        self.insert(handler.into(), None)
    }

    /// Register a handler that can later be removed in bulk through `owner`.
    pub fn register_owned_handler(
        &self,
        owner: &OwnerToken,
        handler: impl Into<Arc<RpcHandler>>,
    ) -> bool {
        self.insert(handler.into(), Some(*owner))
    }

    fn insert(&self, handler: Arc<RpcHandler>, owner: Option<OwnerToken>) -> bool {
        let class = handler.class_name().to_string();
        let mut handlers = self.write();
        if handlers.contains_key(&class) {
            warn!(class = %class, "Handler already registered");
            return false;
        }

        debug!(class = %class, "Registered handler");
        handlers.insert(class, Registration { handler, owner });
        true
    }

    pub fn handler(&self, class_name: &str) -> Option<Arc<RpcHandler>> {
        self.read()
            .get(class_name)
            .map(|registration| Arc::clone(&registration.handler))
    }

    pub fn has_handler(&self, class_name: &str) -> bool {
        self.read().contains_key(class_name)
    }

    pub fn handlers(&self) -> Vec<Arc<RpcHandler>> {
        self.read()
            .values()
            .map(|registration| Arc::clone(&registration.handler))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove the handler registered for `class_name`.
    pub fn unregister_handler(&self, class_name: &str) -> Option<Arc<RpcHandler>> {
        self.write()
            .remove(class_name)
            .map(|registration| registration.handler)
    }

    /// Remove `handler` if it is the one registered for its class.
    pub fn unregister(&self, handler: &Arc<RpcHandler>) -> bool {
        let mut handlers = self.write();
        let registered = handlers
            .get(handler.class_name())
            .is_some_and(|registration| Arc::ptr_eq(&registration.handler, handler));
        if registered {
            handlers.remove(handler.class_name());
        }
        registered
    }

    pub fn unregister_class<T: RpcClass>(&self) -> Option<Arc<RpcHandler>> {
        self.unregister_handler(T::NAME)
    }

    /// Remove every handler registered under `owner` and return how many were removed.
    pub fn unregister_handlers(&self, owner: &OwnerToken) -> usize {
        let mut handlers = self.write();
        let before = handlers.len();
        handlers.retain(|_, registration| registration.owner.as_ref() != Some(owner));
        let removed = before - handlers.len();
        if removed > 0 {
            debug!(%owner, removed, "Unregistered owned handlers");
        }
        removed
    }
}
