//! Error types for ipc-bridge.

use serde_json::{json, Value as JsonValue};
use thiserror::Error;

/// Main error type for all IPC operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// A value could not be serialized, or the encoded message would
    /// contain a raw newline.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An incoming line is not a valid message of the expected scheme.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A binary frame has a wrong marker or a truncated header.
    #[error("frame error: {0}")]
    Frame(String),

    /// A completion arrived for a sequence with no pending call.
    #[error("unknown sequence: {0}")]
    UnknownSequence(u64),

    /// No handler is registered for the command.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The endpoint was torn down before the call completed.
    #[error("cancelled")]
    Cancelled,

    /// The call did not complete within its deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Failure completion from the peer that is not one of the known kinds.
    #[error("{kind}: {message}")]
    Remote {
        /// Error type name reported by the peer.
        kind: String,
        /// Error message reported by the peer.
        message: String,
    },

    /// The transport is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O error on the underlying pipe.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IpcError {
    /// Wire name of the error type, as carried in a failure completion.
    pub fn kind(&self) -> &str {
        match self {
            IpcError::Encoding(_) => "EncodingError",
            IpcError::MalformedMessage(_) => "MalformedMessageError",
            IpcError::Frame(_) => "FrameError",
            IpcError::UnknownSequence(_) => "UnknownSequenceError",
            IpcError::NotImplemented(_) => "NotImplementedError",
            IpcError::Cancelled => "AbortError",
            IpcError::Timeout(_) => "TimeoutError",
            IpcError::Remote { kind, .. } => kind.as_str(),
            IpcError::ConnectionClosed => "NetworkError",
            IpcError::Io(_) => "InternalError",
            IpcError::Json(_) => "TypeError",
        }
    }

    /// Render the error as a failure completion value.
    ///
    /// Shape: `{"err": {"type": <kind>, "message": <message>}}`.
    pub fn to_wire(&self) -> JsonValue {
        let message = match self {
            IpcError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        json!({ "err": { "type": self.kind(), "message": message } })
    }

    /// Rebuild an error from the value of a failure completion.
    ///
    /// Error objects (`{"err": {...}}` or a bare `{"message": ...}`) keep
    /// their type and message; anything else is wrapped in a generic error.
    pub fn from_failure(value: Option<&JsonValue>) -> Self {
        let value = match value {
            Some(v) => v,
            None => return Self::remote("Error", ""),
        };

        let object = value
            .get("err")
            .filter(|err| err.is_object())
            .or_else(|| value.get("message").map(|_| value));

        let Some(err) = object else {
            let message = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Self::remote("Error", &message);
        };

        let message = err
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let kind = err
            .get("type")
            .or_else(|| err.get("code"))
            .and_then(JsonValue::as_str)
            .unwrap_or("Error");

        match kind {
            "NotImplementedError" => {
                IpcError::NotImplemented(strip_prefix(message, "not implemented: "))
            }
            "AbortError" => IpcError::Cancelled,
            "TimeoutError" => {
                IpcError::Timeout(strip_prefix(message, "request timed out: "))
            }
            "EncodingError" => IpcError::Encoding(strip_prefix(message, "encoding error: ")),
            _ => Self::remote(kind, message),
        }
    }

    fn remote(kind: &str, message: &str) -> Self {
        IpcError::Remote {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

fn strip_prefix(message: &str, prefix: &str) -> String {
    message.strip_prefix(prefix).unwrap_or(message).to_string()
}

/// Result type alias using IpcError.
pub type Result<T> = std::result::Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_roundtrip_not_implemented() {
        let err = IpcError::NotImplemented("window.fly".into());
        let wire = err.to_wire();
        assert_eq!(wire["err"]["type"], "NotImplementedError");

        let back = IpcError::from_failure(Some(&wire));
        assert!(matches!(back, IpcError::NotImplemented(ref c) if c == "window.fly"));
        assert!(back.to_string().to_lowercase().contains("not implemented"));
    }

    #[test]
    fn test_from_failure_reuses_error_object() {
        let value = json!({ "err": { "type": "NotFoundError", "message": "no such file" } });
        match IpcError::from_failure(Some(&value)) {
            IpcError::Remote { kind, message } => {
                assert_eq!(kind, "NotFoundError");
                assert_eq!(message, "no such file");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_failure_bare_message_object() {
        let value = json!({ "message": "boom" });
        let err = IpcError::from_failure(Some(&value));
        assert_eq!(err.to_string(), "Error: boom");
    }

    #[test]
    fn test_from_failure_wraps_scalar() {
        let err = IpcError::from_failure(Some(&json!("plain text")));
        assert!(matches!(
            err,
            IpcError::Remote { ref kind, ref message } if kind == "Error" && message == "plain text"
        ));

        let err = IpcError::from_failure(Some(&json!(42)));
        assert_eq!(err.to_string(), "Error: 42");

        let err = IpcError::from_failure(None);
        assert_eq!(err.kind(), "Error");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(IpcError::Encoding("x".into()).kind(), "EncodingError");
        assert_eq!(IpcError::Cancelled.kind(), "AbortError");
        assert_eq!(IpcError::Frame("x".into()).kind(), "FrameError");
    }
}
