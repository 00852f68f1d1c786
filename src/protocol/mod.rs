//! Protocol module - message grammar, line reassembly and binary frames.
//!
//! This module implements everything that touches the wire:
//! - URL message grammar (`ipc://command?index=..&seq=..&state=..&value=..`)
//! - Line buffer for accumulating partial reads
//! - Binary frames for bodies that cannot travel in a `value` parameter

mod frame;
mod line_buffer;
mod message;
mod wire_format;

pub use frame::{BinaryFrame, FrameCodec};
pub use line_buffer::LineBuffer;
pub use message::{Message, MessageCodec, Value};
pub use wire_format::{
    parse_seq, FrameHeader, State, BROADCAST_INDEX, BUFFER_MAP_COMMAND, EXIT_COMMAND,
    FRAME_HEADER_SIZE, FRAME_MARKER, FRAME_PREFIX_SIZE, HEARTBEAT_COMMAND, INDEX_FIELD_SIZE,
    RESOLVE_COMMAND, SEND_COMMAND, SEQ_FIELD_SIZE, STDOUT_COMMAND,
};
