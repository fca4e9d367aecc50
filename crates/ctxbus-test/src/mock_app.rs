//! Mock application peer
//!
//! A scripted peer launched through `open`. The context passed to `open`
//! (type `mockAppContext`) selects what it does:
//! - which system channel to use (1-based, default 1)
//! - whether to broadcast an instrument and/or a contact
//! - whether to join before broadcasting or broadcast before joining
//!
//! ```text
//! {
//!   "type": "mockAppContext",
//!   "reverseFunctionCallOrder": false,
//!   "contextBroadcasts": { "instrument": true, "contact": false }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ctxbus_agent::{AppLauncher, DesktopAgent};
use ctxbus_core::{AppId, BusError, BusResult, Context};

/// Directory name the mock peer is registered under
pub const MOCK_APP_NAME: &str = "MockApp";

/// Context type carrying a mock peer script
pub const MOCK_APP_CONTEXT_TYPE: &str = "mockAppContext";

/// The instrument the mock peer broadcasts
pub fn instrument_context() -> Context {
    Context::new("fdc3.instrument").with("id", json!({ "ticker": "AAPL" }))
}

/// The contact the mock peer broadcasts
pub fn contact_context() -> Context {
    Context::new("fdc3.contact")
        .with("name", json!("Jane Doe"))
        .with("id", json!({ "email": "jane.doe@mail.com" }))
}

/// Which contexts the peer broadcasts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBroadcasts {
    pub instrument: bool,
    pub contact: bool,
}

impl Default for ContextBroadcasts {
    fn default() -> Self {
        ContextBroadcasts {
            instrument: true,
            contact: false,
        }
    }
}

/// Script run by the mock peer once launched
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MockAppScript {
    /// Broadcast onto the channel first, join it afterwards
    pub reverse_function_call_order: bool,
    pub context_broadcasts: ContextBroadcasts,
    /// 1-based position in the system channel list
    pub channel: usize,
}

impl Default for MockAppScript {
    fn default() -> Self {
        MockAppScript {
            reverse_function_call_order: false,
            context_broadcasts: ContextBroadcasts::default(),
            channel: 1,
        }
    }
}

impl MockAppScript {
    /// Also broadcast a contact after the instrument
    pub fn with_contact(mut self) -> Self {
        self.context_broadcasts.contact = true;
        self
    }

    /// Broadcast before joining
    pub fn reversed(mut self) -> Self {
        self.reverse_function_call_order = true;
        self
    }

    pub fn on_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    /// Contexts to broadcast, in order
    pub fn broadcasts(&self) -> Vec<Context> {
        let mut contexts = Vec::new();
        if self.context_broadcasts.instrument {
            contexts.push(instrument_context());
        }
        if self.context_broadcasts.contact {
            contexts.push(contact_context());
        }
        contexts
    }

    /// Encode as the context handed to `open`
    pub fn to_context(&self) -> Context {
        Context::new(MOCK_APP_CONTEXT_TYPE)
            .with("reverseFunctionCallOrder", json!(self.reverse_function_call_order))
            .with(
                "contextBroadcasts",
                json!({
                    "instrument": self.context_broadcasts.instrument,
                    "contact": self.context_broadcasts.contact,
                }),
            )
            .with("channel", json!(self.channel))
    }

    /// Decode from a `mockAppContext`
    pub fn from_context(context: &Context) -> BusResult<Self> {
        if context.context_type() != MOCK_APP_CONTEXT_TYPE {
            return Err(BusError::InvalidContext(format!(
                "expected {}, got {}",
                MOCK_APP_CONTEXT_TYPE,
                context.context_type()
            )));
        }
        serde_json::from_value(Value::Object(context.payload().clone()))
            .map_err(|e| BusError::InvalidContext(e.to_string()))
    }
}

/// Scripted peer
///
/// Without a `mockAppContext` on launch it runs its default script.
#[derive(Default)]
pub struct MockApp {
    default_script: MockAppScript,
    startup_delay: Option<Duration>,
    launched: Mutex<Vec<AppId>>,
}

impl MockApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, script: MockAppScript) -> Self {
        self.default_script = script;
        self
    }

    /// Wait before running the script, to exercise launch timeouts
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = Some(delay);
        self
    }

    /// Peers started so far
    pub fn launches(&self) -> Vec<AppId> {
        self.launched.lock().clone()
    }

    pub fn last_launch(&self) -> Option<AppId> {
        self.launched.lock().last().copied()
    }
}

#[async_trait]
impl AppLauncher for MockApp {
    async fn start(&self, agent: DesktopAgent, initial: Option<Context>) -> BusResult<()> {
        let script = match &initial {
            Some(ctx) if ctx.context_type() == MOCK_APP_CONTEXT_TYPE => MockAppScript::from_context(ctx)?,
            _ => self.default_script.clone(),
        };
        self.launched.lock().push(agent.app_id());

        if let Some(delay) = self.startup_delay {
            tokio::time::sleep(delay).await;
        }

        let channels = agent.get_system_channels().await?;
        let channel = script
            .channel
            .checked_sub(1)
            .and_then(|i| channels.get(i))
            .map(|c| c.id.clone())
            .ok_or_else(|| BusError::Config(format!("no system channel {}", script.channel)))?;

        tracing::debug!(
            app = %agent.app_id(),
            channel = %channel,
            reversed = script.reverse_function_call_order,
            "mock app running script"
        );

        if script.reverse_function_call_order {
            for context in script.broadcasts() {
                agent.broadcast_on(channel.clone(), context).await?;
            }
            agent.join_channel(channel).await?;
        } else {
            agent.join_channel(channel).await?;
            for context in script.broadcasts() {
                agent.broadcast(context).await?;
            }
        }
        Ok(())
    }
}
