//! Application directory - what `open` can launch
//!
//! Launching is opaque to the bus. A launcher starts its peer with a freshly
//! connected [`DesktopAgent`] and resolves once the peer is reachable and
//! has begun its own work.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use ctxbus_core::{BusResult, Context};

use crate::DesktopAgent;

/// Starts an application peer
#[async_trait]
pub trait AppLauncher: Send + Sync {
    /// Start the peer on `agent`
    ///
    /// `initial` is the context passed to `open`, if any. Returning an
    /// error aborts the launch and disconnects the peer.
    async fn start(&self, agent: DesktopAgent, initial: Option<Context>) -> BusResult<()>;
}

/// Launchable applications by name
#[derive(Default)]
pub struct AppDirectory {
    apps: RwLock<BTreeMap<String, Arc<dyn AppLauncher>>>,
}

impl AppDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a launcher, replacing any previous one under `name`
    pub fn register(&self, name: impl Into<String>, launcher: Arc<dyn AppLauncher>) {
        let name = name.into();
        tracing::debug!(app = %name, "application registered in directory");
        self.apps.write().insert(name, launcher);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.apps.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AppLauncher>> {
        self.apps.read().get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.apps.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.apps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.read().is_empty()
    }
}
