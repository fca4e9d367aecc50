//! Scenario harness
//!
//! Drives the broadcast scenarios: one application under test, a mock peer
//! registered for `open`, and helpers addressing system channels by their
//! 1-based position the way scenario scripts do.

use std::sync::Arc;

use ctxbus_agent::{AgentHost, AppLauncher, DesktopAgent, Listener};
use ctxbus_core::{AppId, BusError, BusResult, ChannelId, ContextFilter};
use ctxbus_runtime::{BusConfig, BusStats};

use crate::mock_app::{MockApp, MockAppScript, MOCK_APP_NAME};
use crate::recorder::Recorder;

/// One host with a registered mock peer
pub struct ScenarioHarness {
    host: AgentHost,
    mock: Arc<MockApp>,
}

impl ScenarioHarness {
    /// Harness over a bus built from `config`
    pub fn new(config: BusConfig) -> BusResult<Self> {
        Self::with_mock(config, MockApp::new())
    }

    /// Harness over the FDC3 system channels
    pub fn fdc3() -> BusResult<Self> {
        Self::new(BusConfig::fdc3_system_channels())
    }

    /// Harness with a preconfigured mock peer
    pub fn with_mock(config: BusConfig, mock: MockApp) -> BusResult<Self> {
        let host = AgentHost::new(config)?;
        let mock = Arc::new(mock);
        host.register_app(MOCK_APP_NAME, Arc::clone(&mock) as Arc<dyn AppLauncher>);
        Ok(ScenarioHarness { host, mock })
    }

    pub fn host(&self) -> &AgentHost {
        &self.host
    }

    pub fn mock(&self) -> &Arc<MockApp> {
        &self.mock
    }

    /// Connect an application under test
    pub fn app(&self, name: &str) -> DesktopAgent {
        self.host.connect(name)
    }

    /// Id of the system channel at 1-based `position`
    pub async fn channel_id(agent: &DesktopAgent, position: usize) -> BusResult<ChannelId> {
        let channels = agent.get_system_channels().await?;
        position
            .checked_sub(1)
            .and_then(|i| channels.get(i))
            .map(|c| c.id.clone())
            .ok_or_else(|| BusError::Config(format!("no system channel {}", position)))
    }

    /// Join the system channel at 1-based `position`
    pub async fn join(agent: &DesktopAgent, position: usize) -> BusResult<()> {
        let channel = Self::channel_id(agent, position).await?;
        agent.join_channel(channel).await
    }

    /// Add a listener recording into `recorder`
    pub async fn listen(
        agent: &DesktopAgent,
        filter: impl Into<ContextFilter>,
        recorder: &Recorder,
    ) -> BusResult<Listener> {
        agent.add_context_listener(filter, recorder.handler()).await
    }

    /// Launch the mock peer with `script`
    pub async fn open_mock(&self, agent: &DesktopAgent, script: &MockAppScript) -> BusResult<AppId> {
        agent.open(MOCK_APP_NAME, Some(script.to_context())).await
    }

    pub fn stats(&self) -> BusStats {
        self.host.bus().stats()
    }
}
