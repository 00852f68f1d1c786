//! Bounded dispatch for high-volume calls.
//!
//! The [`QueuedDispatcher`] admits at most `limit` tasks at a time. Excess
//! callers wait in FIFO order for a slot; a slot frees when its task
//! settles, whether it succeeded, failed, or was dropped mid-flight.
//!
//! # Usage
//!
//! The endpoint runs every binary upload through one dispatcher, so a burst
//! of uploads never has more than `upload_concurrency` bodies on the wire.
//!
//! # Configuration
//!
//! - `limit`: Maximum concurrent tasks (default: 16)

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::DEFAULT_UPLOAD_CONCURRENCY;
use crate::error::{IpcError, Result};

/// Concurrency-limited task queue.
///
/// Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct QueuedDispatcher {
    /// Slots; tokio's semaphore hands out permits in FIFO order.
    semaphore: Arc<Semaphore>,
    /// Tasks currently running.
    active: Arc<AtomicUsize>,
    /// Callers waiting for a slot.
    waiting: Arc<AtomicUsize>,
    limit: usize,
}

impl QueuedDispatcher {
    /// Create a dispatcher with the given limit. Zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            active: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Run `task` once a slot is free and return its result.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the dispatcher is closed before a slot frees;
    /// otherwise propagates the task's own result.
    pub async fn submit<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = {
            let _queued = SlotGuard::enter(&self.waiting);
            self.semaphore
                .acquire()
                .await
                .map_err(|_| IpcError::Cancelled)?
        };

        let slot = SlotGuard::enter(&self.active);
        let result = task().await;
        drop(slot);
        drop(permit);
        result
    }

    /// Stop admitting tasks. Waiters and later submissions fail with
    /// `Cancelled`; running tasks finish normally.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Tasks currently running.
    #[inline]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Callers waiting for a slot.
    #[inline]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Maximum concurrent tasks.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for QueuedDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_CONCURRENCY)
    }
}

/// Guard that counts itself into a gauge and out again on drop.
///
/// Keeps the gauges right when a task fails or its future is dropped.
struct SlotGuard<'a> {
    gauge: &'a AtomicUsize,
}

impl<'a> SlotGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        Self { gauge }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::AcqRel);
    }
}
