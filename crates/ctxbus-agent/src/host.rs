//! Agent host - owns one bus and hands out desktop agents

use std::sync::Arc;

use ctxbus_core::BusResult;
use ctxbus_runtime::{BusConfig, ContextBus};

use crate::{AppDirectory, AppLauncher, DesktopAgent};

/// Owns a bus and its application directory
///
/// Independent hosts share nothing, so any number can coexist in one
/// process.
pub struct AgentHost {
    bus: Arc<ContextBus>,
    directory: Arc<AppDirectory>,
}

impl AgentHost {
    pub fn new(config: BusConfig) -> BusResult<Self> {
        Ok(AgentHost {
            bus: Arc::new(ContextBus::new(config)?),
            directory: Arc::new(AppDirectory::new()),
        })
    }

    /// Host with the six FDC3 system channels
    pub fn fdc3() -> BusResult<Self> {
        Self::new(BusConfig::fdc3_system_channels())
    }

    /// Connect an application and return its agent
    pub fn connect(&self, name: impl Into<String>) -> DesktopAgent {
        let app = self.bus.connect(name);
        DesktopAgent::new(app, Arc::clone(&self.bus), Arc::clone(&self.directory))
    }

    /// Make an application launchable through `open`
    pub fn register_app(&self, name: impl Into<String>, launcher: Arc<dyn AppLauncher>) {
        self.directory.register(name, launcher);
    }

    pub fn directory(&self) -> &Arc<AppDirectory> {
        &self.directory
    }

    pub fn bus(&self) -> &Arc<ContextBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxbus_core::{ChannelId, Context, ContextFilter};
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_hosts_are_isolated() {
        let first = AgentHost::fdc3().unwrap();
        let second = AgentHost::fdc3().unwrap();

        let a = first.connect("A");
        let b = second.connect("B");
        let received = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&received);

        a.add_context_listener(ContextFilter::Any, move |_: &Context| *counter.lock() += 1)
            .await
            .unwrap();
        a.join_channel("red").await.unwrap();
        b.join_channel("red").await.unwrap();
        b.broadcast(Context::new("fdc3.instrument")).await.unwrap();

        assert_eq!(*received.lock(), 0);
        assert!(first
            .bus()
            .channel_context(&ChannelId::new("red"), &ContextFilter::Any)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_directory_registration() {
        struct Noop;

        #[async_trait::async_trait]
        impl AppLauncher for Noop {
            async fn start(&self, _agent: DesktopAgent, _initial: Option<Context>) -> BusResult<()> {
                Ok(())
            }
        }

        let host = AgentHost::fdc3().unwrap();
        host.register_app("Zed", Arc::new(Noop));
        host.register_app("Alpha", Arc::new(Noop));

        assert_eq!(host.directory().names(), vec!["Alpha", "Zed"]);
        assert!(host.directory().unregister("Zed"));
        assert_eq!(host.directory().len(), 1);
    }
}
