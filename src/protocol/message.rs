//! Logical messages and the URL grammar that carries them.
//!
//! Every call, completion and event is one line of the form
//! ```text
//! ipc://<command>?<k1>=<v1>&<k2>=<v2>...
//! ```
//! with the recognized parameters `index`, `seq`, `state` and `value`.
//! Any other parameter is kept in [`Message::params`].
//!
//! # Example
//!
//! ```
//! use ipc_bridge::protocol::{Message, MessageCodec, Value};
//! use serde_json::json;
//!
//! let codec = MessageCodec::default();
//! let msg = Message::new("ping")
//!     .with_index(0)
//!     .with_seq(1)
//!     .with_value(Value::Json(json!({ "value": "hi" })));
//!
//! let line = codec.encode(&msg).unwrap();
//! assert!(line.starts_with("ipc://ping?"));
//!
//! let decoded = codec.decode(&line).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use url::Url;

use super::wire_format::{parse_seq, State, BROADCAST_INDEX, RESOLVE_COMMAND, SEND_COMMAND};
use crate::codec::{JsonCodec, QueryCodec};
use crate::config::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SCHEME};
use crate::error::{IpcError, Result};

/// Bytes of an oversized message logged from each end.
const PREVIEW_LEN: usize = 512;

/// Parameter value of a message.
///
/// Decided at decode time: text that parses as JSON becomes
/// [`Value::Json`], anything else stays a [`Value::Scalar`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Bare string, sent verbatim.
    Scalar(String),
    /// Structured value, sent as JSON text.
    Json(JsonValue),
}

impl Value {
    /// Build a JSON value from any serializable type.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Value::Json(JsonCodec::to_value(value)?))
    }

    /// Text carried in the `value` parameter.
    pub fn to_wire(&self) -> Result<String> {
        match self {
            Value::Scalar(s) => Ok(s.clone()),
            Value::Json(v) => JsonCodec::encode(v),
        }
    }

    /// Interpret decoded parameter text.
    pub fn from_wire(text: &str) -> Self {
        match JsonCodec::parse_lenient(text) {
            Some(v) => Value::Json(v),
            None => Value::Scalar(text.to_string()),
        }
    }

    /// View as a JSON tree; scalars become JSON strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Scalar(s) => JsonValue::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }

    /// Convert into a JSON tree; scalars become JSON strings.
    pub fn into_json(self) -> JsonValue {
        match self {
            Value::Scalar(s) => JsonValue::String(s),
            Value::Json(v) => v,
        }
    }

    /// Borrow the text of a scalar or a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Json(v) => v.as_str(),
        }
    }

    /// Deserialize into a concrete type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::Json(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Scalar(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Scalar(value)
    }
}

/// One decoded call, completion or event.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Command name (the URL host).
    pub command: String,
    /// Routing index; `-1` broadcasts.
    pub index: i32,
    /// Sequence number; absent for fire-and-forget messages.
    pub seq: Option<u64>,
    /// Completion state; only present on completions.
    pub state: Option<State>,
    /// Payload.
    pub value: Option<Value>,
    /// Remaining parameters, in wire order.
    pub params: Vec<(String, String)>,
}

impl Message {
    /// Create a message for `command` with broadcast index and no fields.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            index: BROADCAST_INDEX,
            seq: None,
            state: None,
            value: None,
            params: Vec::new(),
        }
    }

    /// Build the completion for a call.
    pub fn completion(seq: u64, index: i32, state: State, value: Value) -> Self {
        Self::new(RESOLVE_COMMAND)
            .with_seq(seq)
            .with_index(index)
            .with_state(state)
            .with_value(value)
    }

    /// Build a fire-and-forget event (`send?event=<name>`).
    pub fn event(event: &str, index: i32, value: Value) -> Self {
        Self::new(SEND_COMMAND)
            .with_param("event", event)
            .with_index(index)
            .with_value(value)
    }

    /// Set the routing index.
    pub fn with_index(mut self, index: i32) -> Self {
        self.index = index;
        self
    }

    /// Set the sequence number.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Set the completion state.
    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the payload.
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Append an extra parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Whether this message settles a previous call.
    #[inline]
    pub fn is_completion(&self) -> bool {
        self.command == RESOLVE_COMMAND
    }

    /// Whether this message expects no completion.
    #[inline]
    pub fn is_event(&self) -> bool {
        self.seq.is_none() && !self.is_completion()
    }

    /// Look up an extra parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Payload as JSON, `null` when absent.
    pub fn json(&self) -> JsonValue {
        self.value
            .as_ref()
            .map(Value::to_json)
            .unwrap_or(JsonValue::Null)
    }
}

/// Encoder/decoder for the URL message grammar.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    scheme: String,
    max_message_size: usize,
}

impl MessageCodec {
    /// Create a codec for `scheme` (without `://`).
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the soft size limit used for oversized-message warnings.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// The scheme this codec reads and writes.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Render a message as one line (without the terminator).
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` if the command is empty or contains a
    /// newline or URL delimiter, or if the value cannot be serialized.
    pub fn encode(&self, msg: &Message) -> Result<String> {
        validate_command(&msg.command)?;

        let index = msg.index.to_string();
        let seq = msg.seq.map(|s| s.to_string());
        let value = msg.value.as_ref().map(Value::to_wire).transpose()?;

        let mut pairs: Vec<(&str, &str)> = msg
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.push(("index", index.as_str()));
        if let Some(seq) = &seq {
            pairs.push(("seq", seq.as_str()));
        }
        if let Some(state) = msg.state {
            pairs.push(("state", state.as_str()));
        }
        if let Some(value) = &value {
            pairs.push(("value", value.as_str()));
        }

        let line = format!(
            "{}://{}?{}",
            self.scheme,
            msg.command,
            QueryCodec::serialize(pairs)
        );

        if line.contains('\n') {
            return Err(IpcError::Encoding(
                "encoded message contains a newline".to_string(),
            ));
        }

        self.check_size("sending", &line);
        Ok(line)
    }

    /// Parse one line into a message.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessageError` if the line is not a URL of this
    /// codec's scheme or has no command.
    pub fn decode(&self, raw: &str) -> Result<Message> {
        self.check_size("receiving", raw);

        let url = Url::parse(raw).map_err(|e| {
            let (head, _) = preview(raw, 100);
            IpcError::MalformedMessage(format!("{e} ({head})"))
        })?;

        if url.scheme() != self.scheme {
            return Err(IpcError::MalformedMessage(format!(
                "expected scheme '{}' but got '{}'",
                self.scheme,
                url.scheme()
            )));
        }

        let command = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IpcError::MalformedMessage("missing command".to_string()))?;

        let mut msg = Message::new(command);

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "index" => msg.index = value.trim().parse().unwrap_or(BROADCAST_INDEX),
                "seq" => msg.seq = parse_seq(&value),
                "state" => msg.state = State::parse(&value),
                "value" => msg.value = Some(Value::from_wire(&value)),
                _ => msg.params.push((key.into_owned(), value.into_owned())),
            }
        }

        Ok(msg)
    }

    fn check_size(&self, direction: &str, text: &str) {
        if text.len() <= self.max_message_size {
            return;
        }
        let (head, tail) = preview(text, PREVIEW_LEN);
        tracing::warn!(
            "{} large message: {}kb (limit {}kb); head: {}... tail: ...{}",
            direction,
            text.len().div_ceil(1024),
            self.max_message_size / 1024,
            head,
            tail
        );
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEME)
    }
}

fn validate_command(command: &str) -> Result<()> {
    if command.is_empty() {
        return Err(IpcError::Encoding("empty command".to_string()));
    }
    if command.contains(['\n', '\r']) {
        return Err(IpcError::Encoding(format!(
            "command {command:?} contains a newline"
        )));
    }
    if let Some(c) = command.chars().find(|&c| !is_command_char(c)) {
        return Err(IpcError::Encoding(format!(
            "command {command:?} contains {c:?}; only ASCII letters, digits, '.', '_' and '-' are allowed"
        )));
    }
    Ok(())
}

/// Characters the decoder reads back unchanged from the URL host.
#[inline]
fn is_command_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// First and last `n` bytes of `text`, cut on char boundaries.
fn preview(text: &str, n: usize) -> (&str, &str) {
    if text.len() <= n {
        return (text, "");
    }
    let mut head_end = n;
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len().saturating_sub(n).max(head_end);
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    (&text[..head_end], &text[tail_start..])
}
