//! Request context for handlers.
//!
//! Carries what a handler may need besides the call's value:
//! - routing: `command`, `index`, `seq`
//! - extra query parameters
//! - the binary body uploaded for this call, if any
//! - `emit` - send an event back to the caller's window
//!
//! # Example
//!
//! ```ignore
//! async fn save(name: String, ctx: RequestContext) -> Result<usize> {
//!     let body = ctx.bytes().cloned().unwrap_or_default();
//!     ctx.emit("saved", &name).await?;
//!     Ok(body.len())
//! }
//! ```

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;
use crate::protocol::{Message, Value};
use crate::transport::Outbound;

/// Context passed to command handlers.
///
/// `RequestContext` is `Clone` and can be moved into spawned tasks.
#[derive(Clone)]
pub struct RequestContext {
    command: String,
    index: i32,
    seq: u64,
    params: Vec<(String, String)>,
    /// Body uploaded through a binary frame with the same seq.
    body: Option<Bytes>,
    /// Outbound path for events (absent in tests).
    outbound: Option<Outbound>,
}

impl RequestContext {
    /// Create a new request context (no outbound path).
    pub fn new(command: impl Into<String>, index: i32, seq: u64) -> Self {
        Self {
            command: command.into(),
            index,
            seq,
            params: Vec::new(),
            body: None,
            outbound: None,
        }
    }

    /// Attach the extra parameters of the call.
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    /// Attach an uploaded body.
    pub fn with_bytes(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach the outbound path used by [`emit`](Self::emit).
    pub fn with_outbound(mut self, outbound: Outbound) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Command name of the call.
    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Routing index of the call.
    #[inline]
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Sequence number of the call.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Look up an extra query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Body uploaded for this call, if any.
    pub fn bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Emit an event to the window that made the call.
    ///
    /// A no-op when the context has no outbound path.
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, value: &T) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            return Ok(());
        };
        let msg = Message::event(event, self.index, Value::json(value)?);
        outbound.send(&msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel;
    use std::sync::Arc;

    #[test]
    fn test_context_creation() {
        let ctx = RequestContext::new("fs.write", 2, 42)
            .with_params(vec![("path".into(), "/tmp/x".into())]);

        assert_eq!(ctx.command(), "fs.write");
        assert_eq!(ctx.index(), 2);
        assert_eq!(ctx.seq(), 42);
        assert_eq!(ctx.param("path"), Some("/tmp/x"));
        assert_eq!(ctx.param("mode"), None);
        assert!(ctx.bytes().is_none());
    }

    #[test]
    fn test_context_bytes() {
        let ctx = RequestContext::new("upload", 0, 1).with_bytes(Bytes::from_static(b"\x00\x01"));
        assert_eq!(ctx.bytes().map(|b| &b[..]), Some(&b"\x00\x01"[..]));
    }

    #[tokio::test]
    async fn test_emit_without_outbound() {
        let ctx = RequestContext::new("cmd", 0, 1);
        assert!(ctx.emit("progress", &50).await.is_ok());
    }

    #[tokio::test]
    async fn test_emit_targets_calling_window() {
        let (transport, mut rx) = channel(4);
        let outbound = Outbound::new(Arc::new(transport), Default::default());
        let ctx = RequestContext::new("cmd", 3, 1).with_outbound(outbound);

        ctx.emit("progress", &50).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            "ipc://send?event=progress&index=3&value=50"
        );
    }

    #[test]
    fn test_context_is_clone() {
        let ctx = RequestContext::new("cmd", 1, 42);
        let ctx2 = ctx.clone();

        assert_eq!(ctx.command(), ctx2.command());
        assert_eq!(ctx.seq(), ctx2.seq());
    }
}
