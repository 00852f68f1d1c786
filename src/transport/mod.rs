//! Transport module - the string channels an endpoint talks over.
//!
//! Provides:
//! - [`Transport`] - anything that can carry one message string to the peer
//! - [`Outbound`] - a transport paired with the message codec
//! - [`ChannelTransport`] - whole messages over an mpsc channel (a webview
//!   `postMessage`-style channel)
//! - [`stdio()`] - the process standard streams, for a host driven over a pipe
//!
//! The line pipe transport is [`WriterHandle`](crate::writer::WriterHandle).

mod stdio;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{IpcError, Result};
use crate::handler::BoxFuture;
use crate::protocol::{Message, MessageCodec};

pub use stdio::{stdio, Stdio};

/// A channel that carries whole message strings to the peer.
pub trait Transport: Send + Sync + 'static {
    /// Send one message. Completes once the message is queued for delivery.
    fn send(&self, message: String) -> BoxFuture<'_, Result<()>>;
}

/// Transport plus the codec used to render messages for it.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct Outbound {
    transport: Arc<dyn Transport>,
    codec: MessageCodec,
}

impl Outbound {
    /// Pair a transport with a codec.
    pub fn new(transport: Arc<dyn Transport>, codec: MessageCodec) -> Self {
        Self { transport, codec }
    }

    /// Encode and send a message.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let text = self.codec.encode(msg)?;
        tracing::debug!("-> {}", msg.command);
        self.transport.send(text).await
    }

    /// Send pre-encoded text (binary frames).
    pub async fn send_text(&self, text: String) -> Result<()> {
        self.transport.send(text).await
    }

    /// The message codec.
    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }
}

/// Message-oriented transport over an mpsc channel.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.tx
                .send(message)
                .await
                .map_err(|_| IpcError::ConnectionClosed)
        })
    }
}

/// Build a channel transport and the receiver the peer reads from.
pub fn channel(capacity: usize) -> (ChannelTransport, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelTransport::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_whole_messages() {
        let (transport, mut rx) = channel(4);

        transport.send("ipc://a?index=0".to_string()).await.unwrap();
        transport.send("b5 with\nnewline".to_string()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "ipc://a?index=0");
        assert_eq!(rx.recv().await.unwrap(), "b5 with\nnewline");
    }

    #[tokio::test]
    async fn test_channel_closed() {
        let (transport, rx) = channel(4);
        drop(rx);

        let result = transport.send("x".to_string()).await;
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_outbound_encodes() {
        let (transport, mut rx) = channel(4);
        let outbound = Outbound::new(Arc::new(transport), MessageCodec::default());

        outbound
            .send(&Message::new("ping").with_index(0).with_seq(1))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "ipc://ping?index=0&seq=1");
    }

    #[tokio::test]
    async fn test_outbound_encoding_error_sends_nothing() {
        let (transport, mut rx) = channel(4);
        let outbound = Outbound::new(Arc::new(transport), MessageCodec::default());

        let result = outbound.send(&Message::new("bad\ncommand")).await;
        assert!(matches!(result, Err(IpcError::Encoding(_))));
        assert!(rx.try_recv().is_err());
    }
}
