//! # ipc-bridge
//!
//! Message protocol between a sandboxed content view and its privileged
//! host process, over transports that only carry strings.
//!
//! Both sides speak the same line grammar:
//!
//! ```text
//! ipc://<command>?index=<i>&seq=<n>&value=<percent-encoded JSON>\n
//! ```
//!
//! ## Architecture
//!
//! - **Messages**: calls, completions (`resolve`) and events (`send`)
//! - **Correlation**: every call carries a seq; the peer answers with a
//!   `resolve` for the same seq, in any order
//! - **Binary bodies**: smuggled through the string channel as `b5` frames
//!   ahead of the call that claims them, at most 16 uploads in flight
//!
//! ## Example
//!
//! ```ignore
//! use ipc_bridge::{Endpoint, Role};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ipc_bridge::Result<()> {
//!     let (stdin, stdout) = ipc_bridge::transport::stdio().into_split();
//!     let (host, reader) = Endpoint::builder()
//!         .role(Role::Host)
//!         .handle("ping", |v: serde_json::Value, _ctx| async move {
//!             Ok(json!({ "echo": v["value"] }))
//!         })
//!         .spawn_pipe(stdin, stdout);
//!
//!     host.log("host ready").await?;
//!     reader.await.map_err(|_| ipc_bridge::IpcError::Cancelled)?
//! }
//! ```

pub mod codec;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod endpoint;

pub use config::{EndpointConfig, Role};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{IpcError, Result};
pub use handler::RequestContext;
pub use protocol::{Message, Value};
