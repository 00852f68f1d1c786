//! Endpoint builder and runtime loop.
//!
//! The [`EndpointBuilder`] provides a fluent API for registering handlers
//! and event listeners and for tuning limits. The [`Endpoint`] owns one
//! side of the bridge:
//! 1. Sequence counter and pending calls ([`Correlator`])
//! 2. Upload queue ([`QueuedDispatcher`])
//! 3. Handlers, event listeners and uploaded bodies ([`CommandRouter`])
//! 4. The outbound transport
//!
//! # Example
//!
//! ```ignore
//! use ipc_bridge::{transport, Endpoint, Role};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (stdin, stdout) = transport::stdio().into_split();
//!     let (endpoint, reader) = Endpoint::builder()
//!         .role(Role::Host)
//!         .handle("ping", |v: serde_json::Value, _ctx| async move {
//!             Ok(json!({ "echo": v["value"] }))
//!         })
//!         .on("progress", |v| eprintln!("progress {:?}", v))
//!         .spawn_pipe(stdin, stdout);
//!
//!     endpoint.emit("ready", -1, &true).await?;
//!     reader.await??;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{EndpointConfig, Role};
use crate::correlator::{Correlator, PendingCall};
use crate::dispatcher::QueuedDispatcher;
use crate::error::{IpcError, Result};
use crate::handler::{CommandRouter, EventTable, HandlerRegistry, RequestContext};
use crate::protocol::{
    BinaryFrame, FrameCodec, LineBuffer, Message, MessageCodec, Value, EXIT_COMMAND,
    HEARTBEAT_COMMAND, STDOUT_COMMAND,
};
use crate::transport::{ChannelTransport, Outbound, Transport};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Read buffer size for line pipes.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and creating an [`Endpoint`].
pub struct EndpointBuilder {
    config: EndpointConfig,
    registry: HandlerRegistry,
    events: EventTable,
}

impl EndpointBuilder {
    /// Create a new builder with default configuration.
    ///
    /// A `heartbeat` handler answering `{}` is pre-registered.
    pub fn new() -> Self {
        let mut registry = HandlerRegistry::new();
        registry.register(HEARTBEAT_COMMAND, |_: serde_json::Value, _ctx| async {
            Ok(json!({}))
        });

        Self {
            config: EndpointConfig::default(),
            registry,
            events: EventTable::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the side of the bridge.
    ///
    /// Default: [`Role::Frontend`]
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set the routing index stamped on outgoing calls.
    ///
    /// Default: 0
    pub fn index(mut self, index: i32) -> Self {
        self.config.index = index;
        self
    }

    /// Set the URL scheme.
    ///
    /// Default: `ipc`
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.scheme = scheme.into();
        self
    }

    /// Set the size above which messages are logged as oversized.
    ///
    /// Default: 512KB
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set how many uploads may be in flight at once.
    ///
    /// Default: 16
    pub fn upload_concurrency(mut self, limit: usize) -> Self {
        self.config.upload_concurrency = limit;
        self
    }

    /// Set the chunk size used while building frame strings.
    ///
    /// Default: 64KB
    pub fn frame_chunk_size(mut self, size: usize) -> Self {
        self.config.frame_chunk_size = size;
        self
    }

    /// Enable the best-effort UTF-8 reinterpretation of outgoing frames.
    ///
    /// Default: disabled
    pub fn normalize_frames(mut self, enabled: bool) -> Self {
        self.config.normalize_frames = enabled;
        self
    }

    /// Set how many uploaded bodies may wait for their call.
    ///
    /// Default: 64
    pub fn max_unclaimed_buffers(mut self, limit: usize) -> Self {
        self.config.max_unclaimed_buffers = limit;
        self
    }

    /// Set the outbound channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the deadline used by [`Endpoint::request`].
    ///
    /// Default: 32 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Register a command handler.
    ///
    /// The handler receives the deserialized value and a context; its
    /// return value becomes the completion.
    pub fn handle<F, T, R, Fut>(mut self, command: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.registry.register(command, handler);
        self
    }

    /// Subscribe to an event.
    pub fn on<F>(self, event: &str, listener: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.on(event, listener);
        self
    }

    /// Build an endpoint that sends through `transport`.
    ///
    /// Inbound traffic is fed with [`Endpoint::run_lines`],
    /// [`Endpoint::run_messages`] or [`Endpoint::receive_line`].
    pub fn build(self, transport: impl Transport) -> Endpoint {
        Endpoint::new(self, Arc::new(transport))
    }

    /// Build an endpoint over a line pipe and spawn its read loop.
    ///
    /// Returns the endpoint and the read loop's handle; the loop ends at
    /// EOF or shutdown.
    pub fn spawn_pipe<R, W>(self, reader: R, writer: W) -> (Endpoint, JoinHandle<Result<()>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer_config = WriterConfig {
            channel_capacity: self.config.channel_capacity,
        };
        let (writer, _writer_task) = spawn_writer_task(writer, writer_config);

        let endpoint = self.build(writer);
        let runner = endpoint.clone();
        let task = tokio::spawn(async move {
            let result = runner.run_lines(reader).await;
            if let Err(e) = &result {
                tracing::error!("Read loop error: {}", e);
            }
            result
        });

        (endpoint, task)
    }

    /// Build an endpoint over a message channel and spawn its read loop.
    pub fn spawn_channel(
        self,
        transport: ChannelTransport,
        inbound: mpsc::Receiver<String>,
    ) -> (Endpoint, JoinHandle<Result<()>>) {
        let endpoint = self.build(transport);
        let runner = endpoint.clone();
        let task = tokio::spawn(async move { runner.run_messages(inbound).await });
        (endpoint, task)
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    config: EndpointConfig,
    correlator: Arc<Correlator>,
    router: Arc<CommandRouter>,
    events: Arc<EventTable>,
    dispatcher: QueuedDispatcher,
    outbound: Outbound,
    frames: FrameCodec,
    closed: watch::Sender<bool>,
}

/// One side of the bridge.
///
/// Cheaply cloneable; clones share all state.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl Endpoint {
    /// Create a new endpoint builder.
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    fn new(builder: EndpointBuilder, transport: Arc<dyn Transport>) -> Self {
        let EndpointBuilder {
            config,
            registry,
            events,
        } = builder;

        let codec = MessageCodec::new(config.scheme.as_str())
            .with_max_message_size(config.max_message_size);
        let outbound = Outbound::new(transport, codec);
        let frames = FrameCodec::new()
            .with_chunk_size(config.frame_chunk_size)
            .with_utf8_normalization(config.normalize_frames);

        let correlator = Arc::new(Correlator::new(config.role.initial_seq()));
        let events = Arc::new(events);
        let router = CommandRouter::new(Arc::new(registry), correlator.clone(), events.clone())
            .with_outbound(outbound.clone())
            .with_buffer_limit(config.max_unclaimed_buffers);
        let (closed, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                dispatcher: QueuedDispatcher::new(config.upload_concurrency),
                config,
                correlator,
                router: Arc::new(router),
                events,
                outbound,
                frames,
                closed,
            }),
        }
    }

    /// The endpoint's configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// Event subscriptions; listeners may be added or removed at any time.
    pub fn events(&self) -> &EventTable {
        &self.inner.events
    }

    /// The upload queue.
    pub fn dispatcher(&self) -> &QueuedDispatcher {
        &self.inner.dispatcher
    }

    /// Number of uploaded bodies whose call has not arrived yet.
    pub fn unclaimed_buffers(&self) -> usize {
        self.inner.router.buffered()
    }

    /// Number of calls waiting for a completion.
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Call `command` and wait up to the configured timeout.
    pub async fn request<T: Serialize + ?Sized>(&self, command: &str, value: &T) -> Result<Value> {
        self.request_with_timeout(command, value, self.inner.config.request_timeout)
            .await
    }

    /// Call `command` and wait up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the deadline passes; the pending entry is
    /// evicted so a late completion is dropped as unknown.
    pub async fn request_with_timeout<T: Serialize + ?Sized>(
        &self,
        command: &str,
        value: &T,
        timeout: Duration,
    ) -> Result<Value> {
        let call = self.start_call(command, value).await?;
        self.wait(command, call, Some(timeout)).await
    }

    /// Call `command` and wait until it completes or the endpoint shuts
    /// down.
    pub async fn request_no_timeout<T: Serialize + ?Sized>(
        &self,
        command: &str,
        value: &T,
    ) -> Result<Value> {
        let call = self.start_call(command, value).await?;
        self.wait(command, call, None).await
    }

    /// Call `command` and deserialize the completion value.
    pub async fn request_as<T, R>(&self, command: &str, value: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(command, value).await?.deserialize()
    }

    async fn start_call<T: Serialize + ?Sized>(
        &self,
        command: &str,
        value: &T,
    ) -> Result<PendingCall> {
        let msg = Message::new(command)
            .with_index(self.inner.config.index)
            .with_value(Value::json(value)?);
        self.inner.correlator.call(&self.inner.outbound, msg).await
    }

    async fn wait(
        &self,
        command: &str,
        call: PendingCall,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let Some(timeout) = timeout else {
            return call.wait().await;
        };

        let seq = call.seq();
        match tokio::time::timeout(timeout, call.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.correlator.evict(seq);
                Err(IpcError::Timeout(format!(
                    "{command} (seq {seq}) after {timeout:?}"
                )))
            }
        }
    }

    /// Send a fire-and-forget event. Index `-1` broadcasts.
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, index: i32, value: &T) -> Result<()> {
        let msg = Message::event(event, index, Value::json(value)?);
        self.inner.outbound.send(&msg).await
    }

    /// Call `command` with a binary body.
    ///
    /// The body travels ahead of the call as a binary frame with the
    /// call's seq. Uploads go through the upload queue, so at most
    /// `upload_concurrency` run at once.
    pub async fn write<T: Serialize + ?Sized>(
        &self,
        command: &str,
        value: &T,
        body: impl Into<Bytes>,
    ) -> Result<Value> {
        let value = Value::json(value)?;
        let body = body.into();
        let inner = &self.inner;

        inner
            .dispatcher
            .submit(|| async move {
                let seq = inner.correlator.next_seq();
                let index = inner.config.index;

                // both must encode before anything is sent
                let msg = Message::new(command)
                    .with_index(index)
                    .with_seq(seq)
                    .with_value(value);
                let line = inner.outbound.codec().encode(&msg)?;
                let frame = inner
                    .frames
                    .encode_frame(&BinaryFrame::new(index, seq, body))?;

                let call = inner.correlator.register(seq)?;
                let sent = match inner.outbound.send_text(frame).await {
                    Ok(()) => inner.outbound.send_text(line).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    inner.correlator.evict(seq);
                    return Err(e);
                }

                self.wait(command, call, Some(inner.config.request_timeout))
                    .await
            })
            .await
    }

    /// Forward a diagnostic line to the peer's output.
    pub async fn log(&self, text: &str) -> Result<()> {
        let msg = Message::new(STDOUT_COMMAND).with_value(text);
        self.inner.outbound.send(&msg).await
    }

    /// Announce exit with `code`, then shut down.
    pub async fn exit(&self, code: i32) -> Result<()> {
        let msg = Message::new(EXIT_COMMAND)
            .with_index(0)
            .with_seq(self.inner.correlator.next_seq())
            .with_value(json!(code));
        let result = self.inner.outbound.send(&msg).await;
        self.shutdown();
        result
    }

    /// Liveness probe; resolves once the peer answers.
    pub async fn heartbeat(&self) -> Result<()> {
        self.request(HEARTBEAT_COMMAND, &json!({})).await.map(|_| ())
    }

    /// Tear the endpoint down.
    ///
    /// Pending calls and queued uploads fail with `Cancelled`, new
    /// requests are refused and read loops stop. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        tracing::debug!("endpoint shutting down");

        self.inner.correlator.cancel_all();
        self.inner.dispatcher.close();
        self.inner.router.clear_buffers();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Wait until the endpoint shuts down.
    pub async fn wait_for_shutdown(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Process one inbound message string (a line or a channel message).
    ///
    /// Undecodable input is logged and dropped.
    pub fn receive_line(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        if FrameCodec::is_frame(text) {
            match self.inner.frames.decode(text) {
                Ok(frame) => {
                    self.inner.router.accept_frame(frame);
                }
                Err(e) => tracing::warn!("dropping frame: {}", e),
            }
            return;
        }

        match self.inner.outbound.codec().decode(text) {
            Ok(msg) => self.receive(msg),
            Err(e) => tracing::warn!("dropping message: {}", e),
        }
    }

    /// Route one decoded message.
    ///
    /// Completions and events are settled before this returns; calls run
    /// on their own task and answer when their handler finishes.
    pub fn receive(&self, msg: Message) {
        tracing::debug!("<- {} seq={:?}", msg.command, msg.seq);

        if !CommandRouter::is_call(&msg) {
            self.inner.router.settle(msg);
            return;
        }

        let router = self.inner.router.clone();
        tokio::spawn(async move {
            router.handle(msg).await;
        });
    }

    /// Drive a line pipe until EOF or shutdown, then shut down.
    pub async fn run_lines<R: AsyncRead + Unpin>(&self, mut reader: R) -> Result<()> {
        let mut lines = LineBuffer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut closed = self.inner.closed.subscribe();

        let result = loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => break Ok(()),
                        Ok(n) => n,
                        Err(e) => break Err(IpcError::Io(e)),
                    };
                    for line in lines.push(&buf[..n]) {
                        self.receive_line(&line);
                    }
                }
                _ = closed.wait_for(|closed| *closed) => break Ok(()),
            }
        };

        if !lines.is_empty() {
            tracing::warn!("discarding {} bytes of unterminated input", lines.len());
        }
        self.shutdown();
        result
    }

    /// Drive a message channel until it closes or shutdown, then shut down.
    pub async fn run_messages(&self, mut inbound: mpsc::Receiver<String>) -> Result<()> {
        let mut closed = self.inner.closed.subscribe();

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(text) => self.receive_line(&text),
                    None => break,
                },
                _ = closed.wait_for(|closed| *closed) => break,
            }
        }

        self.shutdown();
        Ok(())
    }
}
