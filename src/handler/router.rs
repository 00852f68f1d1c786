//! Command router.
//!
//! Routes every decoded message to the right place:
//! - `resolve` → [`Correlator::complete`]
//! - no seq → the [`EventTable`]
//! - anything else → the handler registered for the command, whose
//!   outcome becomes a completion addressed to the same seq and index
//!
//! Binary bodies arrive ahead of their call as frames; the router keeps
//! them by seq and hands each one to the call that claims it. At most
//! `max_unclaimed_buffers` bodies are kept; past that the oldest is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde_json::Value as JsonValue;

use super::{EventTable, HandlerRegistry, RequestContext};
use crate::config::DEFAULT_MAX_UNCLAIMED_BUFFERS;
use crate::correlator::Correlator;
use crate::error::IpcError;
use crate::protocol::{BinaryFrame, Message, State, Value, EXIT_COMMAND, SEND_COMMAND};
use crate::transport::Outbound;

/// Router shared by the read loop and the handler tasks it spawns.
pub struct CommandRouter {
    registry: Arc<HandlerRegistry>,
    correlator: Arc<Correlator>,
    events: Arc<EventTable>,
    /// Uploaded bodies waiting for their call, by seq.
    buffers: Mutex<BufferMap>,
    outbound: Option<Outbound>,
}

/// Unclaimed bodies plus their arrival order.
struct BufferMap {
    bodies: HashMap<u64, Bytes>,
    order: VecDeque<u64>,
    limit: usize,
}

impl BufferMap {
    fn new(limit: usize) -> Self {
        Self {
            bodies: HashMap::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Store a body, returning the seqs dropped to stay within the limit.
    fn insert(&mut self, seq: u64, body: Bytes) -> (bool, Vec<u64>) {
        let replaced = self.bodies.insert(seq, body).is_some();
        if replaced {
            self.order.retain(|s| *s != seq);
        }
        self.order.push_back(seq);

        let mut evicted = Vec::new();
        while self.bodies.len() > self.limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.bodies.remove(&oldest).is_some() {
                evicted.push(oldest);
            }
        }
        (replaced, evicted)
    }

    fn take(&mut self, seq: u64) -> Option<Bytes> {
        let body = self.bodies.remove(&seq)?;
        self.order.retain(|s| *s != seq);
        Some(body)
    }

    fn clear(&mut self) {
        self.bodies.clear();
        self.order.clear();
    }
}

impl CommandRouter {
    /// Create a router without an outbound path; completions are returned
    /// by [`dispatch`](Self::dispatch) but [`handle`](Self::handle) cannot
    /// send them.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        correlator: Arc<Correlator>,
        events: Arc<EventTable>,
    ) -> Self {
        Self {
            registry,
            correlator,
            events,
            buffers: Mutex::new(BufferMap::new(DEFAULT_MAX_UNCLAIMED_BUFFERS)),
            outbound: None,
        }
    }

    /// Set how many unclaimed bodies are kept. Zero is treated as one.
    pub fn with_buffer_limit(self, limit: usize) -> Self {
        Self {
            buffers: Mutex::new(BufferMap::new(limit)),
            ..self
        }
    }

    /// Attach the outbound path for completions and handler events.
    pub fn with_outbound(mut self, outbound: Outbound) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Whether `msg` should be handed to [`handle`](Self::handle) rather
    /// than settled inline.
    pub fn is_call(msg: &Message) -> bool {
        !msg.is_completion() && !msg.is_event() && msg.command != EXIT_COMMAND
    }

    /// Route one message. Returns the completion to send back, if any.
    pub async fn dispatch(&self, msg: Message) -> Option<Message> {
        if !Self::is_call(&msg) {
            self.settle(msg);
            return None;
        }

        let seq = msg.seq?;
        let index = msg.index;

        let mut ctx = RequestContext::new(msg.command.as_str(), index, seq)
            .with_params(msg.params);
        if let Some(body) = self.take_buffer(seq) {
            ctx = ctx.with_bytes(body);
        }
        if let Some(outbound) = &self.outbound {
            ctx = ctx.with_outbound(outbound.clone());
        }

        let outcome = self.registry.dispatch(&msg.command, msg.value, ctx).await;
        let reply = match outcome {
            Ok(value) => Message::completion(seq, index, State::Ok, value),
            Err(e) => {
                match &e {
                    IpcError::NotImplemented(_) => tracing::debug!("{}", e),
                    _ => tracing::warn!("handler for {} failed: {}", msg.command, e),
                }
                Message::completion(seq, index, State::Error, Value::Json(e.to_wire()))
            }
        };
        Some(reply)
    }

    /// Route one message and send its completion, if any.
    pub async fn handle(&self, msg: Message) {
        let Some(reply) = self.dispatch(msg).await else {
            return;
        };
        let Some(outbound) = &self.outbound else {
            tracing::warn!("no outbound path, dropping completion for seq {:?}", reply.seq);
            return;
        };
        if let Err(e) = outbound.send(&reply).await {
            tracing::error!("failed to send completion for seq {:?}: {}", reply.seq, e);
        }
    }

    /// Settle a completion or notify an event. Never awaits.
    pub fn settle(&self, msg: Message) {
        if msg.is_completion() {
            match msg.seq {
                Some(seq) => {
                    self.correlator.complete(seq, msg.state, msg.value);
                }
                None => tracing::warn!("completion without seq dropped"),
            }
            return;
        }

        let name = if msg.command == SEND_COMMAND {
            match msg.param("event") {
                Some(event) => event.to_string(),
                None => {
                    tracing::warn!("send without event name dropped");
                    return;
                }
            }
        } else {
            msg.command.clone()
        };

        let value = msg.value.unwrap_or(Value::Json(JsonValue::Null));
        let notified = self.events.emit(&name, &value);
        tracing::debug!("event {} notified {} listeners", name, notified);
    }

    /// Keep a frame's body for the call with the same seq.
    ///
    /// Returns the `buffer.map` message describing it.
    pub fn accept_frame(&self, frame: BinaryFrame) -> Message {
        let msg = frame.to_message();
        tracing::debug!(
            "buffer.map index={} seq={} ({} bytes)",
            frame.index,
            frame.seq,
            frame.body.len()
        );

        let (replaced, evicted) = self.buffers().insert(frame.seq, frame.body);
        if replaced {
            tracing::warn!("replaced unclaimed buffer for seq {}", frame.seq);
        }
        for seq in evicted {
            tracing::warn!("dropping unclaimed buffer for seq {}: too many waiting", seq);
        }
        msg
    }

    /// Remove and return the body stored for `seq`.
    pub fn take_buffer(&self, seq: u64) -> Option<Bytes> {
        self.buffers().take(seq)
    }

    /// Number of bodies not yet claimed.
    pub fn buffered(&self) -> usize {
        self.buffers().bodies.len()
    }

    /// Whether a body is waiting for `seq`.
    pub fn has_buffer(&self, seq: u64) -> bool {
        self.buffers().bodies.contains_key(&seq)
    }

    /// Drop every unclaimed body.
    pub fn clear_buffers(&self) {
        self.buffers().clear();
    }

    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn buffers(&self) -> MutexGuard<'_, BufferMap> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
