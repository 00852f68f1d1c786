//! Wire constants and the fixed-width binary frame header.
//!
//! A binary frame starts with a 2-byte marker followed by a 24-byte
//! routing header:
//! ```text
//! ┌────────┬───────────┬─────────────┬──────────┐
//! │ Marker │ Index     │ Seq         │ Body     │
//! │ "b5"   │ 4 bytes   │ 20 bytes    │ N bytes  │
//! │        │ ASCII, NUL│ ASCII, NUL  │ raw      │
//! │        │ padded    │ padded      │          │
//! └────────┴───────────┴─────────────┴──────────┘
//! ```
//!
//! Numbers are written as left-justified ASCII digits. Readers also accept
//! space padding.

use crate::error::{IpcError, Result};

/// Completion command name.
pub const RESOLVE_COMMAND: &str = "resolve";

/// Event command name; the event name travels in the `event` parameter.
pub const SEND_COMMAND: &str = "send";

/// Command synthesized from a decoded binary frame.
pub const BUFFER_MAP_COMMAND: &str = "buffer.map";

/// Host exit notification.
pub const EXIT_COMMAND: &str = "exit";

/// Forwarded diagnostic output.
pub const STDOUT_COMMAND: &str = "stdout";

/// Liveness probe.
pub const HEARTBEAT_COMMAND: &str = "heartbeat";

/// Routing index meaning "every window".
pub const BROADCAST_INDEX: i32 = -1;

/// Marker at the start of every binary frame (`b5`, for "buffer").
pub const FRAME_MARKER: [u8; 2] = *b"b5";

/// Width of the index field.
pub const INDEX_FIELD_SIZE: usize = 4;

/// Width of the sequence field.
pub const SEQ_FIELD_SIZE: usize = 20;

/// Header size in bytes (index + seq).
pub const FRAME_HEADER_SIZE: usize = INDEX_FIELD_SIZE + SEQ_FIELD_SIZE;

/// Marker plus header; the body starts at this offset.
pub const FRAME_PREFIX_SIZE: usize = FRAME_MARKER.len() + FRAME_HEADER_SIZE;

/// Completion state carried in the `state` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// `0`: the call succeeded.
    Ok,
    /// `1`: the call failed; the value describes the error.
    Error,
}

impl State {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Ok => "0",
            State::Error => "1",
        }
    }

    /// Parse a `state` parameter. Zero is success, any other integer is
    /// failure, anything else is unknown.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().parse::<i64>() {
            Ok(0) => Some(State::Ok),
            Ok(_) => Some(State::Error),
            Err(_) => None,
        }
    }
}

/// Parse a sequence number.
///
/// Frontend-issued sequences may carry an `R` prefix (`R12`) and
/// big-integer renderings a trailing `n`; both are ignored.
pub fn parse_seq(text: &str) -> Option<u64> {
    let text = text.trim();
    let text = text
        .strip_prefix('R')
        .or_else(|| text.strip_prefix('r'))
        .unwrap_or(text);
    let text = text.strip_suffix('n').unwrap_or(text);
    text.parse().ok()
}

/// Routing header of a binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Routing index (window), `-1` for broadcast.
    pub index: i32,
    /// Sequence number of the call this body belongs to.
    pub seq: u64,
}

impl FrameHeader {
    /// Create a new header.
    #[inline]
    pub fn new(index: i32, seq: u64) -> Self {
        Self { index, seq }
    }

    /// Encode into the fixed-width field layout.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the index does not fit in 4 ASCII digits.
    pub fn encode(&self) -> Result<[u8; FRAME_HEADER_SIZE]> {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        write_field(&mut buf[..INDEX_FIELD_SIZE], &self.index.to_string())?;
        write_field(&mut buf[INDEX_FIELD_SIZE..], &self.seq.to_string())?;
        Ok(buf)
    }

    /// Decode from at least `FRAME_HEADER_SIZE` bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(IpcError::Frame(format!(
                "header needs {} bytes, got {}",
                FRAME_HEADER_SIZE,
                buf.len()
            )));
        }

        let index_text = read_field(&buf[..INDEX_FIELD_SIZE])?;
        let seq_text = read_field(&buf[INDEX_FIELD_SIZE..FRAME_HEADER_SIZE])?;

        let index = index_text
            .parse::<i32>()
            .map_err(|_| IpcError::Frame(format!("invalid index field {index_text:?}")))?;
        let seq = parse_seq(seq_text)
            .ok_or_else(|| IpcError::Frame(format!("invalid seq field {seq_text:?}")))?;

        Ok(Self { index, seq })
    }
}

fn write_field(dst: &mut [u8], text: &str) -> Result<()> {
    let bytes = text.as_bytes();
    if bytes.len() > dst.len() {
        return Err(IpcError::Frame(format!(
            "{text} does not fit in a {}-byte field",
            dst.len()
        )));
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn read_field(src: &[u8]) -> Result<&str> {
    let end = src
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(src.len());
    std::str::from_utf8(&src[..end])
        .map(str::trim)
        .map_err(|_| IpcError::Frame("header field is not ASCII".to_string()))
}
