//! Handler module - command handling and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps command names to handlers
//! - [`RequestContext`] - routing info, uploaded body and event emission
//! - [`CommandRouter`] - routes calls, completions, events and frames
//! - [`EventTable`] - subscriptions for fire-and-forget messages
//!
//! # Example
//!
//! ```
//! use ipc_bridge::handler::{HandlerRegistry, RequestContext};
//! use ipc_bridge::IpcError;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register("echo", |data: String, _ctx: RequestContext| async move {
//!     Ok(data)
//! });
//!
//! registry.register("fs.stat", |path: String, _ctx: RequestContext| async move {
//!     Err::<(), _>(IpcError::Remote {
//!         kind: "NotFoundError".into(),
//!         message: format!("{path} does not exist"),
//!     })
//! });
//! ```

mod context;
mod events;
mod registry;
mod router;

pub use context::RequestContext;
pub use events::{EventTable, Listener, ListenerId};
pub use registry::{BoxFuture, Handler, HandlerRegistry, HandlerResult, TypedHandler};
pub use router::CommandRouter;
