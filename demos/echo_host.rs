//! Echo Host - a host process answering calls over its standard streams.
//!
//! This example demonstrates:
//! - Building a host endpoint with typed handlers
//! - Talking over stdin/stdout, one message per line
//! - Logging to stderr so stdout stays a clean data channel
//!
//! # Running
//!
//! ```text
//! $ printf 'ipc://echo?index=0&seq=R1&value=%%7B%%22message%%22%%3A%%22hi%%22%%7D\n' \
//!     | RUST_LOG=debug cargo run --example echo_host
//! ipc://resolve?index=0&seq=1&state=0&value=%7B%22echo%22%3A%22hi%22%7D
//! ```

use ipc_bridge::{transport, Endpoint, IpcError, RequestContext, Role};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Input structure for the echo command.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo command.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries messages, logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (stdin, stdout) = transport::stdio().into_split();
    let (host, reader) = Endpoint::builder()
        .role(Role::Host)
        .handle("echo", |data: EchoInput, _ctx: RequestContext| async move {
            Ok(EchoOutput { echo: data.message })
        })
        .handle("fail", |reason: String, _ctx: RequestContext| async move {
            Err::<(), _>(IpcError::Remote {
                kind: "DemoError".into(),
                message: reason,
            })
        })
        .spawn_pipe(stdin, stdout);

    host.log("echo host ready").await?;

    // Runs until stdin closes
    reader.await??;
    tracing::info!("stdin closed, exiting");

    Ok(())
}
