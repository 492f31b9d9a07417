use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {courier_protocol::AgentName, tracing::info};

use crate::handler::{HandlerStats, MessageHandler};

pub(crate) struct HandlerEntry {
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) stats: Arc<HandlerStats>,
}

/// Agent name → the single handler responsible for its inbound messages.
///
/// Lookups take the read lock; registration is serialized through the write
/// lock. Registering a name twice replaces the earlier handler.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<AgentName, Arc<HandlerEntry>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Install `handler` for `name`, returning the handler it replaced.
    pub fn register(
        &self,
        name: AgentName,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let entry = Arc::new(HandlerEntry {
            handler,
            stats: Arc::new(HandlerStats::new()),
        });
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone(), entry);
        match previous {
            Some(previous) => {
                info!(agent = %name, "message handler replaced");
                Some(Arc::clone(&previous.handler))
            },
            None => {
                info!(agent = %name, "message handler registered");
                None
            },
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some();
        if removed {
            info!(agent = name, "message handler unregistered");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.entry(name).map(|e| Arc::clone(&e.handler))
    }

    pub(crate) fn entry(&self, name: &str) -> Option<Arc<HandlerEntry>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Stats for the handler currently registered under `name`.
    pub fn stats(&self, name: &str) -> Option<Arc<HandlerStats>> {
        self.entry(name).map(|e| Arc::clone(&e.stats))
    }

    /// Registered agent names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .map(|name| name.to_string())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
