//! Upload - binary bodies carried through the string channel.
//!
//! This example demonstrates:
//! - `Endpoint::write()` sending a body as a `b5` frame ahead of its call
//! - Reading the body in a handler with `ctx.bytes()`
//! - The upload queue limiting how many uploads run at once
//!
//! # Running
//!
//! ```text
//! $ RUST_LOG=ipc_bridge=debug cargo run --example upload
//! ```

use ipc_bridge::transport::channel;
use ipc_bridge::{Endpoint, RequestContext, Role};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (to_host, host_rx) = channel(256);
    let (to_frontend, frontend_rx) = channel(256);

    let (_host, _) = Endpoint::builder()
        .role(Role::Host)
        .handle("fs.write", |path: String, ctx: RequestContext| async move {
            let size = ctx.bytes().map_or(0, |b| b.len());
            tracing::info!(path = %path, size, "received upload");
            Ok(size)
        })
        .spawn_channel(to_frontend, host_rx);

    let (frontend, _) = Endpoint::builder()
        .upload_concurrency(4)
        .spawn_channel(to_host, frontend_rx);

    let mut uploads = Vec::new();
    for n in 0..32usize {
        let frontend = frontend.clone();
        uploads.push(tokio::spawn(async move {
            let body: Vec<u8> = (0..n * 1024).map(|i| i as u8).collect();
            frontend
                .write("fs.write", &format!("/tmp/upload-{n}.bin"), body)
                .await
        }));
    }

    let mut total = 0u64;
    for upload in uploads {
        let written = upload.await??;
        total += written.to_json().as_u64().unwrap_or(0);
    }
    println!("uploaded {total} bytes");

    frontend.shutdown();
    Ok(())
}
