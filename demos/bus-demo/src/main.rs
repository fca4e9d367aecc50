//! ctxbus Demo Application
//!
//! Demonstrates channel-scoped context sharing:
//! - A blotter listening on the first system channel
//! - A scripted peer launched with `open` that joins and broadcasts
//! - Replay of the channel's cached context to a late listener
//!
//! Environment:
//! - `RUST_LOG` log filter (default `info`)
//! - `LOG_FORMAT=json` for JSON log lines
//! - `BUS_CONFIG` path to a JSON bus configuration

use std::env;
use std::sync::Arc;

use ctxbus_agent::{AgentHost, AppLauncher};
use ctxbus_core::{Context, ContextFilter};
use ctxbus_runtime::{init_tracing, BusConfig, LogFormat};
use ctxbus_test::{MockApp, MockAppScript, MOCK_APP_NAME};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let format = LogFormat::from_env_value(env::var("LOG_FORMAT").ok().as_deref());
    init_tracing("info", format)?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           ctxbus Demo - Channel Context Sharing            ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let config = match env::var("BUS_CONFIG") {
        Ok(path) => BusConfig::from_json_file(path)?,
        Err(_) => BusConfig::default(),
    };

    let host = AgentHost::new(config)?;
    host.register_app(MOCK_APP_NAME, Arc::new(MockApp::new()) as Arc<dyn AppLauncher>);

    let blotter = host.connect("blotter");
    let info = blotter.get_info();
    println!(
        "Provider: {} {} (FDC3 {})",
        info.provider,
        info.provider_version.as_deref().unwrap_or("-"),
        info.fdc3_version
    );

    let channels = blotter.get_system_channels().await?;
    println!("System channels:");
    for channel in &channels {
        let name = channel.display_metadata.name.as_deref().unwrap_or("-");
        println!("  {:<10} {}", channel.id.as_str(), name);
    }
    let Some(first) = channels.first() else {
        println!("No system channels configured");
        return Ok(());
    };
    println!();

    let listener = blotter
        .add_context_listener(ContextFilter::Any, |ctx: &Context| {
            println!("[blotter] received {}", ctx);
        })
        .await?;
    blotter.join_channel(first.id.clone()).await?;
    println!("[blotter] joined {}", first.id);

    println!("[blotter] opening {}...", MOCK_APP_NAME);
    let peer = blotter
        .open(MOCK_APP_NAME, Some(MockAppScript::default().with_contact().to_context()))
        .await?;
    println!("[blotter] {} running as {}", MOCK_APP_NAME, peer);

    // A viewer arriving late still sees the channel's current instrument
    let viewer = host.connect("viewer");
    viewer.join_channel(first.id.clone()).await?;
    viewer
        .add_context_listener("fdc3.instrument", |ctx: &Context| {
            println!("[viewer]  received {}", ctx);
        })
        .await?;

    // Only the viewer hears this one
    listener.unsubscribe().await;
    blotter
        .broadcast(Context::new("fdc3.instrument").with("id", json!({ "ticker": "MSFT" })))
        .await?;

    let stats = host.bus().stats();
    println!();
    println!("Broadcasts: {}", stats.broadcasts);
    println!("Deliveries: {}", stats.deliveries);
    println!("Replays:    {}", stats.replays);
    println!("Faults:     {}", stats.callback_faults);

    Ok(())
}
