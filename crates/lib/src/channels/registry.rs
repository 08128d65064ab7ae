//! Handler registry: the ordered set of handlers every event is fanned out to.

use crate::channels::handler::Handler;
use std::sync::Arc;

/// Registered handlers, in registration order.
///
/// Built once at startup and then moved into the dispatcher; registration needs
/// `&mut self`, so nothing can be added while requests are served.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        log::debug!("registered handler {}", handler.name());
        self.handlers.push(handler);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: Arc<dyn Handler>) -> Self {
        self.register(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
