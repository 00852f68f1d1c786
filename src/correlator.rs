//! Request correlation.
//!
//! The [`Correlator`] issues sequence numbers and keeps one pending entry
//! per call in flight. A completion settles its entry exactly once: the
//! entry leaves the table before the waiting caller is woken, so a second
//! completion for the same sequence finds nothing and is dropped.
//!
//! # Example
//!
//! ```
//! use ipc_bridge::correlator::Correlator;
//! use ipc_bridge::protocol::{State, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let correlator = Correlator::new(1);
//! let seq = correlator.next_seq();
//! let call = correlator.register(seq).unwrap();
//!
//! assert!(correlator.complete(seq, Some(State::Ok), Some(Value::from("ok"))));
//! assert!(!correlator.complete(seq, Some(State::Ok), None));
//! assert_eq!(call.wait().await.unwrap(), Value::from("ok"));
//! # }
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::error::{IpcError, Result};
use crate::protocol::{Message, State, Value};
use crate::transport::Outbound;

type Settle = oneshot::Sender<Result<Value>>;

/// A call waiting for its completion.
#[derive(Debug)]
pub struct PendingCall {
    seq: u64,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingCall {
    /// Sequence number of the call.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Wait for the completion.
    ///
    /// Resolves with the completion value, or fails with the error the peer
    /// reported, or `Cancelled` if the entry was dropped unsettled.
    pub async fn wait(self) -> Result<Value> {
        self.rx.await.unwrap_or(Err(IpcError::Cancelled))
    }
}

/// Sequence counter plus pending-call table of one endpoint.
#[derive(Debug)]
pub struct Correlator {
    next_seq: AtomicU64,
    pending: Mutex<HashMap<u64, Settle>>,
    closed: AtomicBool,
}

impl Correlator {
    /// Create a correlator whose first sequence number is `initial_seq`.
    pub fn new(initial_seq: u64) -> Self {
        Self {
            next_seq: AtomicU64::new(initial_seq),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate the next sequence number.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::AcqRel)
    }

    /// Register a pending entry for `seq`.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` after [`cancel_all`](Self::cancel_all), and
    /// `EncodingError` if `seq` already has a pending entry.
    pub fn register(&self, seq: u64) -> Result<PendingCall> {
        if self.is_closed() {
            return Err(IpcError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();
        match self.table().entry(seq) {
            Entry::Occupied(_) => {
                return Err(IpcError::Encoding(format!(
                    "sequence {seq} is already in flight"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        Ok(PendingCall { seq, rx })
    }

    /// Register `msg` (allocating a seq if it has none) and transmit it.
    ///
    /// The entry is evicted again if encoding or sending fails.
    pub async fn call(&self, outbound: &Outbound, mut msg: Message) -> Result<PendingCall> {
        let seq = match msg.seq {
            Some(seq) => seq,
            None => {
                let seq = self.next_seq();
                msg.seq = Some(seq);
                seq
            }
        };

        let pending = self.register(seq)?;
        if let Err(e) = outbound.send(&msg).await {
            self.evict(seq);
            return Err(e);
        }
        Ok(pending)
    }

    /// Send `command` and wait for its completion.
    pub async fn send(
        &self,
        outbound: &Outbound,
        command: &str,
        index: i32,
        value: Value,
    ) -> Result<Value> {
        let msg = Message::new(command).with_index(index).with_value(value);
        self.call(outbound, msg).await?.wait().await
    }

    /// Settle the pending entry for `seq`.
    ///
    /// A zero or missing state resolves with `value` (or `null`); any
    /// other state rejects with the error `value` describes. Returns
    /// `false`, after logging, when no entry is pending for `seq`.
    pub fn complete(&self, seq: u64, state: Option<State>, value: Option<Value>) -> bool {
        let Some(tx) = self.table().remove(&seq) else {
            tracing::warn!("{}", IpcError::UnknownSequence(seq));
            return false;
        };

        let outcome = match state {
            Some(State::Error) => Err(IpcError::from_failure(
                value.map(Value::into_json).as_ref(),
            )),
            Some(State::Ok) | None => Ok(value.unwrap_or(Value::Json(JsonValue::Null))),
        };

        if tx.send(outcome).is_err() {
            tracing::debug!("caller for seq {} stopped waiting", seq);
        }
        true
    }

    /// Drop the pending entry for `seq` without settling it.
    pub fn evict(&self, seq: u64) -> bool {
        self.table().remove(&seq).is_some()
    }

    /// Reject every pending call with `Cancelled` and refuse new ones.
    pub fn cancel_all(&self) {
        self.closed.store(true, Ordering::Release);

        let drained: Vec<Settle> = self.table().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            tracing::debug!("cancelling {} pending calls", drained.len());
        }
        for tx in drained {
            let _ = tx.send(Err(IpcError::Cancelled));
        }
    }

    /// Number of calls in flight.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Whether `seq` has a pending entry.
    pub fn is_pending(&self, seq: u64) -> bool {
        self.table().contains_key(&seq)
    }

    /// Whether [`cancel_all`](Self::cancel_all) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u64, Settle>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
