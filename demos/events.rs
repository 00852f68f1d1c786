//! Events - progress events emitted from a handler.
//!
//! This example demonstrates:
//! - Emitting events to the calling window with `ctx.emit()`
//! - Subscribing with `.on()` and `events().once()`
//! - Broadcasting with index `-1`
//!
//! Both endpoints live in this process, joined by message channels.
//!
//! # Running
//!
//! ```text
//! $ RUST_LOG=ipc_bridge=debug cargo run --example events
//! ```

use std::time::Duration;

use ipc_bridge::transport::channel;
use ipc_bridge::{Endpoint, IpcError, RequestContext, Role};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Input structure for the start_work command.
#[derive(Deserialize, Debug)]
struct WorkInput {
    steps: u32,
}

/// Progress event structure.
#[derive(Serialize, Debug)]
struct ProgressEvent {
    percent: u32,
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (to_host, host_rx) = channel(64);
    let (to_frontend, frontend_rx) = channel(64);

    let (host, _) = Endpoint::builder()
        .role(Role::Host)
        .handle("start_work", |data: WorkInput, ctx: RequestContext| async move {
            for i in 1..=data.steps {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let event = ProgressEvent {
                    percent: (i * 100) / data.steps,
                    message: format!("Step {} of {}", i, data.steps),
                };
                ctx.emit("progress", &event).await?;
            }
            Ok::<_, IpcError>(data.steps)
        })
        .spawn_channel(to_frontend, host_rx);

    let (frontend, _) = Endpoint::builder()
        .on("progress", |v| {
            let v = v.to_json();
            println!("Progress: {}% ({})", v["percent"], v["message"]);
        })
        .spawn_channel(to_host, frontend_rx);

    frontend.events().once("ready", |_| println!("host is ready"));
    host.emit("ready", -1, &true).await?;

    let steps = frontend
        .request("start_work", &serde_json::json!({ "steps": 10 }))
        .await?;
    println!("finished {} steps", steps.to_json());

    host.exit(0).await?;
    frontend.shutdown();

    Ok(())
}
