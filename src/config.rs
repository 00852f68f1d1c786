//! Endpoint configuration.
//!
//! All limits have `DEFAULT_*` constants. The values are set through
//! [`EndpointBuilder`](crate::EndpointBuilder); `EndpointConfig::default()`
//! gives a frontend endpoint on the `ipc` scheme.

use std::time::Duration;

/// Default URL scheme for messages (`ipc://command?...`).
pub const DEFAULT_SCHEME: &str = "ipc";

/// Soft limit on message length; longer messages are logged, not rejected.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Default concurrency limit of the upload dispatcher.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 16;

/// Default chunk size used while building a binary frame string.
pub const DEFAULT_FRAME_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of uploaded bodies kept while waiting for their call.
pub const DEFAULT_MAX_UNCLAIMED_BUFFERS: usize = 64;

/// Default capacity of the outbound line channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default deadline for `Endpoint::request`.
pub const TIMEOUT: Duration = Duration::from_secs(32);

/// Which side of the bridge an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// The sandboxed content view. Sequence numbers start at 1.
    #[default]
    Frontend,
    /// The privileged host process. Sequence numbers start at 0.
    Host,
}

impl Role {
    /// First sequence number issued by an endpoint of this role.
    pub fn initial_seq(self) -> u64 {
        match self {
            Role::Frontend => 1,
            Role::Host => 0,
        }
    }
}

/// Configuration for an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// URL scheme of every message, without `://`.
    pub scheme: String,
    /// Frontend or host.
    pub role: Role,
    /// Routing index stamped on outgoing requests (the window index).
    pub index: i32,
    /// Soft size limit above which messages are logged as oversized.
    pub max_message_size: usize,
    /// Concurrency limit for binary uploads.
    pub upload_concurrency: usize,
    /// Chunk size used while building binary frame strings.
    pub frame_chunk_size: usize,
    /// Apply the best-effort UTF-8 reinterpretation to outgoing frames.
    pub normalize_frames: bool,
    /// Unclaimed uploaded bodies kept before the oldest is dropped.
    pub max_unclaimed_buffers: usize,
    /// Capacity of the outbound line channel.
    pub channel_capacity: usize,
    /// Deadline applied by `Endpoint::request`.
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            role: Role::default(),
            index: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            frame_chunk_size: DEFAULT_FRAME_CHUNK_SIZE,
            normalize_frames: false,
            max_unclaimed_buffers: DEFAULT_MAX_UNCLAIMED_BUFFERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            request_timeout: TIMEOUT,
        }
    }
}
