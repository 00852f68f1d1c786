//! JSON codec using `serde_json`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{IpcError, Result};

/// JSON codec for structured values.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON text.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` if the value cannot be serialized
    /// (for example a map with non-string keys).
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|e| IpcError::Encoding(e.to_string()))
    }

    /// Convert a value into a JSON tree.
    #[inline]
    pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<JsonValue> {
        serde_json::to_value(value).map_err(|e| IpcError::Encoding(e.to_string()))
    }

    /// Decode JSON text into `T`.
    #[inline]
    pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse text as JSON, returning `None` instead of an error.
    ///
    /// Used for parameter values, which may be JSON or a bare string.
    #[inline]
    pub fn parse_lenient(text: &str) -> Option<JsonValue> {
        serde_json::from_str(text).ok()
    }
}
