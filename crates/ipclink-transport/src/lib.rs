//! Message-passing transports for ipclink.
//!
//! A transport delivers whole messages in order over a duplex pipe; that is
//! the entire contract. The IPC layer above never sees partial reads or
//! byte-level framing. Two implementations ship here: an in-process pair
//! for tests and same-process wiring, and a Unix-domain-socket transport
//! with length-prefixed framing.

pub mod error;
pub mod framing;
pub mod protocol;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use framing::{decode_message, encode_message, DEFAULT_MAX_MESSAGE, HEADER_SIZE, MAGIC};
pub use protocol::{MemoryProtocol, MessagePassingProtocol};
#[cfg(unix)]
pub use uds::{UdsListener, UdsProtocol};
