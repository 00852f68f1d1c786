//! Binary frames carried through a string-only channel.
//!
//! A frame is `marker ++ header ++ body` (see [`wire_format`](super::wire_format)).
//! The bytes are turned into text one code point per byte, chunk by chunk,
//! so the result is a string whose chars are all `U+0000..=U+00FF`.
//!
//! With UTF-8 normalization enabled the encoder then tries to reinterpret
//! the raw bytes as UTF-8, keeping the byte-mapped string when they are
//! not valid. The decoder reverses either form: a string with any char
//! above `U+00FF` must be the normalized form and is read back as UTF-8,
//! anything else is read back one byte per char.
//!
//! # Example
//!
//! ```
//! use ipc_bridge::protocol::FrameCodec;
//!
//! let codec = FrameCodec::new();
//! let text = codec.encode(0, 7, &[0x00, 0xff, 0x10]).unwrap();
//! assert!(FrameCodec::is_frame(&text));
//!
//! let frame = codec.decode(&text).unwrap();
//! assert_eq!((frame.index, frame.seq), (0, 7));
//! assert_eq!(&frame.body[..], &[0x00, 0xff, 0x10]);
//! ```

use bytes::Bytes;

use super::message::Message;
use super::wire_format::{
    FrameHeader, BUFFER_MAP_COMMAND, FRAME_HEADER_SIZE, FRAME_MARKER, FRAME_PREFIX_SIZE,
};
use crate::config::DEFAULT_FRAME_CHUNK_SIZE;
use crate::error::{IpcError, Result};

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    /// Routing index.
    pub index: i32,
    /// Sequence of the call this body belongs to.
    pub seq: u64,
    /// Raw body (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl BinaryFrame {
    /// Create a new frame.
    pub fn new(index: i32, seq: u64, body: impl Into<Bytes>) -> Self {
        Self {
            index,
            seq,
            body: body.into(),
        }
    }

    /// Serialize into one contiguous buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header = FrameHeader::new(self.index, self.seq).encode()?;

        let mut buf = Vec::with_capacity(FRAME_PREFIX_SIZE + self.body.len());
        buf.extend_from_slice(&FRAME_MARKER);
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    /// Parse a contiguous buffer.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the marker does not match or the buffer is
    /// shorter than marker plus header.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_PREFIX_SIZE {
            return Err(IpcError::Frame(format!(
                "frame needs at least {} bytes, got {}",
                FRAME_PREFIX_SIZE,
                buf.len()
            )));
        }
        if buf[..FRAME_MARKER.len()] != FRAME_MARKER {
            return Err(IpcError::Frame("bad frame marker".to_string()));
        }

        let header_start = FRAME_MARKER.len();
        let header = FrameHeader::decode(&buf[header_start..header_start + FRAME_HEADER_SIZE])?;

        Ok(Self {
            index: header.index,
            seq: header.seq,
            body: Bytes::copy_from_slice(&buf[FRAME_PREFIX_SIZE..]),
        })
    }

    /// The `buffer.map` message announcing this body to the router.
    pub fn to_message(&self) -> Message {
        Message::new(BUFFER_MAP_COMMAND)
            .with_index(self.index)
            .with_seq(self.seq)
    }
}

/// Encoder/decoder between binary frames and frame strings.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    chunk_size: usize,
    normalize_utf8: bool,
}

impl FrameCodec {
    /// Create a codec with 64KB chunks and no UTF-8 normalization.
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_FRAME_CHUNK_SIZE,
            normalize_utf8: false,
        }
    }

    /// Codec with the platform's normalization setting (enabled on Linux).
    pub fn for_current_platform() -> Self {
        Self::new().with_utf8_normalization(cfg!(target_os = "linux"))
    }

    /// Set the construction chunk size. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Enable or disable the best-effort UTF-8 reinterpretation.
    ///
    /// When enabled, a frame whose raw bytes are valid UTF-8 is sent as that
    /// text instead of one char per byte. Decoding is then no longer the
    /// exact inverse of encoding: a valid UTF-8 body whose chars all lie in
    /// U+0080..=U+00FF decodes to their latin-1 bytes, e.g. `[C3 A9]`
    /// comes back as `[E9]`. Leave it disabled when bodies must round trip
    /// byte for byte.
    pub fn with_utf8_normalization(mut self, enabled: bool) -> Self {
        self.normalize_utf8 = enabled;
        self
    }

    /// Whether the best-effort UTF-8 reinterpretation is applied.
    pub fn normalizes_utf8(&self) -> bool {
        self.normalize_utf8
    }

    /// Encode a frame into its transport string.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the index or seq does not fit the header.
    pub fn encode(&self, index: i32, seq: u64, body: &[u8]) -> Result<String> {
        let frame = BinaryFrame::new(index, seq, Bytes::copy_from_slice(body));
        self.encode_frame(&frame)
    }

    /// Encode an already built frame.
    pub fn encode_frame(&self, frame: &BinaryFrame) -> Result<String> {
        let raw = frame.to_bytes()?;

        let mut text = String::with_capacity(raw.len());
        for chunk in raw.chunks(self.chunk_size) {
            text.extend(chunk.iter().map(|&b| char::from(b)));
        }

        if self.normalize_utf8 {
            match String::from_utf8(raw) {
                Ok(utf8) => return Ok(utf8),
                Err(_) => {
                    tracing::debug!("frame body is not UTF-8, keeping byte-mapped text");
                }
            }
        }

        Ok(text)
    }

    /// Decode a transport string into a frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` on a bad marker or a truncated header.
    pub fn decode(&self, text: &str) -> Result<BinaryFrame> {
        let raw = if text.chars().any(|c| u32::from(c) > 0xff) {
            text.as_bytes().to_vec()
        } else {
            text.chars().map(|c| c as u8).collect()
        };
        BinaryFrame::from_bytes(&raw)
    }

    /// Whether a received string is a frame rather than a message.
    #[inline]
    pub fn is_frame(text: &str) -> bool {
        text.as_bytes().starts_with(&FRAME_MARKER)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
