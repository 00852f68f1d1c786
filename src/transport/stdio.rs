//! Standard streams as a line pipe.
//!
//! A host spawned by the runtime talks over its stdin/stdout, one message
//! per line.
//!
//! # Important
//!
//! - **stdout**: messages only, every line is parsed by the peer
//! - **stderr**: logs and debug output
//! - **Never use `println!`** in a host driven this way
//!
//! # Example
//!
//! ```ignore
//! use ipc_bridge::{transport, Endpoint, Role};
//!
//! let (stdin, stdout) = transport::stdio().into_split();
//! let (endpoint, reader) = Endpoint::builder().role(Role::Host).spawn_pipe(stdin, stdout);
//! ```

use tokio::io::{Stdin, Stdout};

/// The process standard streams.
pub struct Stdio {
    /// Inbound lines.
    pub stdin: Stdin,
    /// Outbound lines.
    pub stdout: Stdout,
}

impl Stdio {
    /// Split into the read half and the write half.
    pub fn into_split(self) -> (Stdin, Stdout) {
        (self.stdin, self.stdout)
    }
}

/// Open the process standard streams.
pub fn stdio() -> Stdio {
    Stdio {
        stdin: tokio::io::stdin(),
        stdout: tokio::io::stdout(),
    }
}
