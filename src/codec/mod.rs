//! Codec module - text serialization for message parameters.
//!
//! This module provides the codecs used by the message grammar:
//!
//! - [`QueryCodec`] - `key=value&...` query strings with `+` rewritten to `%20`
//! - [`JsonCodec`] - JSON text for structured values (`serde_json`)
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//! Both sides of the bridge agree on exactly one encoding per concern, so
//! there is nothing to select at runtime.
//!
//! # Example
//!
//! ```
//! use ipc_bridge::codec::{JsonCodec, QueryCodec};
//!
//! let query = QueryCodec::serialize([("value", "a b+c")]);
//! assert_eq!(query, "value=a%20b%2Bc");
//!
//! let text = JsonCodec::encode(&vec![1, 2, 3]).unwrap();
//! assert_eq!(JsonCodec::parse_lenient(&text), Some(serde_json::json!([1, 2, 3])));
//! ```

mod json;
mod percent;

pub use json::JsonCodec;
pub use percent::QueryCodec;
