//! Event subscription table.
//!
//! Fire-and-forget messages carry no seq and get no completion. Listeners
//! subscribe by name; `send?event=<name>` messages notify the listeners of
//! `<name>`, any other seq-less message notifies the listeners of its
//! command.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use ipc_bridge::handler::EventTable;
//! use ipc_bridge::protocol::Value;
//!
//! let table = EventTable::new();
//! let hits = Arc::new(AtomicUsize::new(0));
//!
//! let counter = hits.clone();
//! table.once("ready", move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! table.emit("ready", &Value::from("now"));
//! table.emit("ready", &Value::from("again"));
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::Value;

/// Event listener callback.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`EventTable::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Listeners keyed by event name.
pub struct EventTable {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
}

impl EventTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(listener), false)
    }

    /// Subscribe to the next occurrence of `event` only.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(listener), true)
    }

    fn add(&self, event: &str, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table()
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    /// Remove one listener. Returns whether it was subscribed.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut table = self.table();
        let Some(entries) = table.get_mut(event) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            table.remove(event);
        }
        removed
    }

    /// Remove every listener of `event`.
    pub fn remove_all(&self, event: &str) {
        self.table().remove(event);
    }

    /// Notify the listeners of `event`, in subscription order. Returns how
    /// many were called.
    ///
    /// Listeners run after the table is unlocked, so they may subscribe or
    /// unsubscribe.
    pub fn emit(&self, event: &str, value: &Value) -> usize {
        let listeners: Vec<Listener> = {
            let mut table = self.table();
            let Some(entries) = table.get_mut(event) else {
                return 0;
            };
            let listeners = entries.iter().map(|e| e.listener.clone()).collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                table.remove(event);
            }
            listeners
        };

        for listener in &listeners {
            listener(value);
        }
        listeners.len()
    }

    /// Number of listeners subscribed to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.table().get(event).map_or(0, Vec::len)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        (hits, move |_: &Value| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_on_and_emit() {
        let table = EventTable::new();
        let (hits, listener) = counter();
        table.on("progress", listener);

        assert_eq!(table.emit("progress", &Value::Json(json!(1))), 1);
        assert_eq!(table.emit("progress", &Value::Json(json!(2))), 1);
        assert_eq!(table.emit("other", &Value::Json(json!(3))), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once_fires_once() {
        let table = EventTable::new();
        let (hits, listener) = counter();
        table.once("ready", listener);

        assert_eq!(table.listener_count("ready"), 1);
        table.emit("ready", &Value::from("a"));
        table.emit("ready", &Value::from("b"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(table.listener_count("ready"), 0);
    }

    #[test]
    fn test_remove_listener() {
        let table = EventTable::new();
        let (hits, listener) = counter();
        let id = table.on("tick", listener);
        let (_, other) = counter();
        table.on("tick", other);

        assert!(table.remove_listener("tick", id));
        assert!(!table.remove_listener("tick", id));
        assert_eq!(table.listener_count("tick"), 1);

        table.emit("tick", &Value::from("x"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_receives_value() {
        let table = EventTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        table.on("data", move |v| sink.lock().unwrap().push(v.to_json()));

        table.emit("data", &Value::Json(json!({ "n": 1 })));
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "n": 1 })]);
    }

    #[test]
    fn test_listener_may_resubscribe() {
        let table = Arc::new(EventTable::new());
        let inner = table.clone();
        table.once("again", move |_| {
            inner.on("again", |_| {});
        });

        table.emit("again", &Value::from("x"));
        assert_eq!(table.listener_count("again"), 1);
    }

    #[test]
    fn test_remove_all() {
        let table = EventTable::new();
        table.on("a", |_| {});
        table.on("a", |_| {});
        table.remove_all("a");
        assert_eq!(table.listener_count("a"), 0);
    }
}
