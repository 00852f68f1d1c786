//! Line buffer for reassembling newline-terminated messages.
//!
//! Uses `bytes::BytesMut` for the carry buffer. The transport may split a
//! message across reads or pack several messages into one read; the buffer
//! only yields a line once its `\n` terminator has been seen.
//!
//! Splitting happens on raw bytes, so a multi-byte UTF-8 sequence cut in
//! half by a read is carried over intact.
//!
//! # Example
//!
//! ```
//! use ipc_bridge::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//!
//! assert!(buffer.push(b"ipc://ping?se").is_empty());
//! let lines = buffer.push(b"q=1\nipc://pong?seq=2\nipc://pa");
//! assert_eq!(lines, vec!["ipc://ping?seq=1", "ipc://pong?seq=2"]);
//! assert_eq!(buffer.len(), 8);
//! ```

use bytes::BytesMut;

/// Buffer for accumulating incoming text and extracting complete lines.
pub struct LineBuffer {
    /// Bytes after the last seen newline.
    carry: BytesMut,
}

impl LineBuffer {
    /// Create a new line buffer with a 64KB initial carry capacity.
    pub fn new() -> Self {
        Self::with_capacity(64 * 1024)
    }

    /// Create a new line buffer with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            carry: BytesMut::with_capacity(capacity),
        }
    }

    /// Push raw bytes and extract every line they complete.
    ///
    /// The first completed line is prefixed with whatever was carried from
    /// earlier pushes. Bytes after the last newline are carried to the next
    /// push. Lines that are not valid UTF-8 are decoded lossily.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.carry.extend_from_slice(&rest[..pos]);
            let line = self.carry.split();
            lines.push(Self::into_text(&line));
            rest = &rest[pos + 1..];
        }

        self.carry.extend_from_slice(rest);
        lines
    }

    /// Push a text chunk. See [`push`](Self::push).
    #[inline]
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.push(chunk.as_bytes())
    }

    fn into_text(line: &[u8]) -> String {
        match std::str::from_utf8(line) {
            Ok(s) => s.to_owned(),
            Err(e) => {
                tracing::warn!("line is not valid UTF-8 ({}), decoding lossily", e);
                String::from_utf8_lossy(line).into_owned()
            }
        }
    }

    /// Number of carried bytes.
    pub fn len(&self) -> usize {
        self.carry.len()
    }

    /// Check if nothing is carried.
    pub fn is_empty(&self) -> bool {
        self.carry.is_empty()
    }

    /// Drop the carried partial line.
    pub fn clear(&mut self) {
        self.carry.clear();
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"ipc://ping?seq=1\n");

        assert_eq!(lines, vec!["ipc://ping?seq=1"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_no_newline_is_carried() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"ipc://ping").is_empty());
        assert!(buffer.push(b"?seq=1").is_empty());
        assert_eq!(buffer.len(), 16);

        let lines = buffer.push(b"\n");
        assert_eq!(lines, vec!["ipc://ping?seq=1"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_lines_in_one_push() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"a\nb\nc\n");

        assert_eq!(lines, vec!["a", "b", "c"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_carry_prefixes_first_line_only() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"he");

        let lines = buffer.push(b"llo\nworld\npar");
        assert_eq!(lines, vec!["hello", "world"]);
        assert_eq!(buffer.len(), 3);

        let lines = buffer.push(b"tial\n");
        assert_eq!(lines, vec!["partial"]);
    }

    #[test]
    fn test_empty_lines_are_yielded() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"\n\nx\n");
        assert_eq!(lines, vec!["", "", "x"]);
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut buffer = LineBuffer::new();
        let text = "value=é\n".as_bytes();
        let cut = text.len() - 2; // inside the two-byte 'é'

        assert!(buffer.push(&text[..cut]).is_empty());
        let lines = buffer.push(&text[cut..]);
        assert_eq!(lines, vec!["value=é"]);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"ab\xffcd\n");
        assert_eq!(lines, vec!["ab\u{fffd}cd"]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = LineBuffer::new();
        let data = b"ipc://a?x=1\nipc://b?y=2\n";

        let mut all = Vec::new();
        for byte in data {
            all.extend(buffer.push(&[*byte]));
        }

        assert_eq!(all, vec!["ipc://a?x=1", "ipc://b?y=2"]);
    }

    #[test]
    fn test_clear_drops_partial() {
        let mut buffer = LineBuffer::new();
        buffer.push_str("partial");
        buffer.clear();

        let lines = buffer.push_str("fresh\n");
        assert_eq!(lines, vec!["fresh"]);
    }
}
