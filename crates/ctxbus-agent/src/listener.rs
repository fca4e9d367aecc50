//! Listener handle returned by `add_context_listener`

use std::fmt;
use std::sync::Weak;

use ctxbus_core::{AppId, ContextFilter, ListenerId};
use ctxbus_runtime::ContextBus;

/// Handle to a registered context listener
///
/// Dropping the handle does not unsubscribe; call [`Listener::unsubscribe`].
/// The handle does not keep the bus alive.
pub struct Listener {
    id: ListenerId,
    owner: AppId,
    filter: ContextFilter,
    bus: Weak<ContextBus>,
}

impl Listener {
    pub(crate) fn new(id: ListenerId, owner: AppId, filter: ContextFilter, bus: Weak<ContextBus>) -> Self {
        Listener {
            id,
            owner,
            filter,
            bus,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn owner(&self) -> AppId {
        self.owner
    }

    pub fn filter(&self) -> &ContextFilter {
        &self.filter
    }

    /// Stop receiving contexts; safe to call more than once
    ///
    /// Returns whether this call deactivated the listener.
    pub async fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.unsubscribe(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("filter", &self.filter)
            .finish()
    }
}
