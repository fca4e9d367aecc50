//! ctxbus Agent - The API applications program against
//!
//! One [`DesktopAgent`] per connected application. Every operation is
//! `async` so local, remote and cross-process callers share one contract,
//! even though dispatch inside the bus is synchronous.
//!
//! ```no_run
//! # async fn demo() -> ctxbus_core::BusResult<()> {
//! use ctxbus_agent::AgentHost;
//! use ctxbus_core::Context;
//!
//! let host = AgentHost::fdc3()?;
//! let agent = host.connect("blotter");
//! let channels = agent.get_system_channels().await?;
//! agent.join_channel(channels[0].id.clone()).await?;
//!
//! let listener = agent
//!     .add_context_listener("fdc3.instrument", |ctx: &Context| println!("{}", ctx))
//!     .await?;
//! agent.broadcast(Context::new("fdc3.instrument")).await?;
//! listener.unsubscribe().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod listener;
pub mod directory;
pub mod host;

pub use agent::*;
pub use listener::*;
pub use directory::*;
pub use host::*;
