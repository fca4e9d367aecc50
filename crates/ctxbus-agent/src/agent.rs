//! Desktop agent - one application's view of the bus

use std::fmt;
use std::sync::Arc;

use ctxbus_core::{
    AppId, BusError, BusResult, ChannelDescriptor, ChannelId, Context, ContextFilter,
    ImplementationMetadata,
};
use ctxbus_runtime::{ContextBus, ContextHandler};

use crate::{AppDirectory, Listener};

/// The API surface handed to one connected application
#[derive(Clone)]
pub struct DesktopAgent {
    app: AppId,
    bus: Arc<ContextBus>,
    directory: Arc<AppDirectory>,
}

impl DesktopAgent {
    pub(crate) fn new(app: AppId, bus: Arc<ContextBus>, directory: Arc<AppDirectory>) -> Self {
        DesktopAgent {
            app,
            bus,
            directory,
        }
    }

    /// Identity of the application this agent speaks for
    pub fn app_id(&self) -> AppId {
        self.app
    }

    pub fn bus(&self) -> &Arc<ContextBus> {
        &self.bus
    }

    /// Implementation metadata
    pub fn get_info(&self) -> ImplementationMetadata {
        self.bus.info()
    }

    /// The fixed system channels, in stable order
    pub async fn get_system_channels(&self) -> BusResult<Vec<ChannelDescriptor>> {
        self.ensure_connected()?;
        Ok(self.bus.system_channels())
    }

    /// Join a system channel, leaving the current one
    ///
    /// Listeners of this application receive the channel's cached contexts
    /// that match them before this call completes.
    pub async fn join_channel(&self, channel: impl Into<ChannelId>) -> BusResult<()> {
        self.bus.join(self.app, &channel.into())?;
        Ok(())
    }

    pub async fn leave_current_channel(&self) -> BusResult<()> {
        self.bus.leave(self.app)?;
        Ok(())
    }

    pub async fn get_current_channel(&self) -> BusResult<Option<ChannelDescriptor>> {
        self.bus.current_channel(self.app)
    }

    /// Cached context on the current channel; most recent of any type
    /// when `context_type` is `None`
    pub async fn get_current_context(&self, context_type: Option<&str>) -> BusResult<Option<Context>> {
        self.bus.current_context(self.app, context_type)
    }

    /// Listen for contexts on whatever channel this application is on
    ///
    /// The listener follows later joins and leaves; it never needs to be
    /// re-registered.
    pub async fn add_context_listener<F>(
        &self,
        filter: impl Into<ContextFilter>,
        handler: F,
    ) -> BusResult<Listener>
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        let filter = filter.into();
        let handler: ContextHandler = Arc::new(handler);
        let id = self.bus.add_listener(self.app, filter.clone(), handler)?;
        Ok(Listener::new(id, self.app, filter, Arc::downgrade(&self.bus)))
    }

    /// Broadcast on the current channel; a no-op when on no channel
    pub async fn broadcast(&self, context: Context) -> BusResult<()> {
        self.bus.broadcast(self.app, context)?;
        Ok(())
    }

    /// Broadcast on a specific system channel without joining it
    pub async fn broadcast_on(&self, channel: impl Into<ChannelId>, context: Context) -> BusResult<()> {
        self.bus.broadcast_on(self.app, &channel.into(), context)?;
        Ok(())
    }

    /// Launch a registered application
    ///
    /// Resolves once the peer is reachable. If `context` is given, it is
    /// delivered to the listeners the peer registered while starting.
    pub async fn open(&self, name: &str, context: Option<Context>) -> BusResult<AppId> {
        self.ensure_connected()?;
        if let Some(ctx) = &context {
            ctx.validate()?;
        }
        let launcher = self
            .directory
            .get(name)
            .ok_or_else(|| BusError::AppNotFound(name.to_string()))?;

        let peer = self.bus.connect(name);
        let agent = DesktopAgent::new(peer, Arc::clone(&self.bus), Arc::clone(&self.directory));
        let timeout = self.bus.config().launch_timeout;

        tracing::debug!(opener = %self.app, app = %peer, app_name = name, "launching application");

        let launched = tokio::time::timeout(timeout, launcher.start(agent, context.clone())).await;
        let failure = match launched {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(BusError::ErrorOnLaunch {
                app: name.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Some(BusError::AppTimeout(name.to_string())),
        };

        if let Some(err) = failure {
            tracing::warn!(app = %peer, app_name = name, error = %err, "launch failed");
            // The peer may already be gone if its script disconnected it
            let _ = self.bus.disconnect(peer);
            return Err(err);
        }

        if let Some(ctx) = context {
            if self.bus.is_connected(peer) {
                self.bus.deliver_to(peer, ctx)?;
            }
        }
        Ok(peer)
    }

    /// Disconnect this application: its membership is cleared and all of
    /// its listeners stop
    pub async fn disconnect(&self) -> BusResult<()> {
        self.bus.disconnect(self.app)
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected(self.app)
    }

    fn ensure_connected(&self) -> BusResult<()> {
        if self.bus.is_connected(self.app) {
            Ok(())
        } else {
            Err(BusError::AppNotConnected(self.app))
        }
    }
}

impl fmt::Debug for DesktopAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesktopAgent").field("app", &self.app).finish()
    }
}
