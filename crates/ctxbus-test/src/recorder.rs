//! Context recorder for listener assertions

use std::sync::Arc;

use parking_lot::Mutex;

use ctxbus_core::Context;

/// Collects every context delivered to the handlers it hands out
///
/// Clones share the same log.
#[derive(Clone, Default)]
pub struct Recorder {
    received: Arc<Mutex<Vec<Context>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener callback appending to this recorder
    pub fn handler(&self) -> impl Fn(&Context) + Send + Sync + 'static {
        let received = Arc::clone(&self.received);
        move |ctx: &Context| received.lock().push(ctx.clone())
    }

    pub fn received(&self) -> Vec<Context> {
        self.received.lock().clone()
    }

    /// Types of the received contexts, in delivery order
    pub fn types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|c| c.context_type().to_string())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn count_of(&self, context_type: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|c| c.context_type() == context_type)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}
