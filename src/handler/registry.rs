//! Handler registry for dispatching calls by command name.
//!
//! Handlers are plain async functions taking the call's value
//! (deserialized into any `DeserializeOwned` type) and a
//! [`RequestContext`]; whatever they return is serialized into the
//! completion.
//!
//! # Example
//!
//! ```
//! use ipc_bridge::handler::HandlerRegistry;
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Deserialize)]
//! struct Ping {
//!     value: String,
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("ping", |ping: Ping, _ctx| async move {
//!     Ok(json!({ "echo": ping.value }))
//! });
//!
//! assert!(registry.contains("ping"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::RequestContext;
use crate::error::{IpcError, Result};
use crate::protocol::Value;

/// Result type for handler functions.
pub type HandlerResult = Result<Value>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a call with its raw value (absent when the call had none).
    fn call(&self, value: Option<Value>, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes the value before calling the handler and
/// serializes what it returns.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call(&self, value: Option<Value>, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let json = value.map(Value::into_json).unwrap_or(JsonValue::Null);
        let parsed: T = match serde_json::from_value(json) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(IpcError::Json(e)) }),
        };

        let fut = (self.handler)(parsed, ctx);
        Box::pin(async move { Value::json(&fut.await?) })
    }
}

/// Registry mapping command names to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a typed handler, replacing any handler already registered
    /// for `command`.
    pub fn register<F, T, R, Fut>(&mut self, command: &str, handler: F)
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.register_handler(command, TypedHandler::new(handler));
    }

    /// Register any [`Handler`] implementation.
    pub fn register_handler(&mut self, command: &str, handler: impl Handler) {
        if self
            .handlers
            .insert(command.to_string(), Box::new(handler))
            .is_some()
        {
            tracing::debug!("replaced handler for {}", command);
        }
    }

    /// Remove the handler for `command`.
    pub fn unregister(&mut self, command: &str) -> bool {
        self.handlers.remove(command).is_some()
    }

    /// Get a handler by command name.
    pub fn get_handler(&self, command: &str) -> Option<&dyn Handler> {
        self.handlers.get(command).map(|h| h.as_ref())
    }

    /// Whether a handler is registered for `command`.
    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch a call to the handler registered for `command`.
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` when no handler is registered, otherwise
    /// whatever the handler returns.
    pub async fn dispatch(
        &self,
        command: &str,
        value: Option<Value>,
        ctx: RequestContext,
    ) -> HandlerResult {
        let handler = self
            .get_handler(command)
            .ok_or_else(|| IpcError::NotImplemented(command.to_string()))?;

        handler.call(value, ctx).await
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
