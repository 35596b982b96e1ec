//! pydbg-dap: Debug Adapter Protocol plumbing for pydbg.
//!
//! This crate owns everything between the raw byte stream and the session
//! engine: the adapter transport (socket with connect retries, or process
//! pipes), `Content-Length` message framing, request sequencing and
//! response correlation, and the DAP wire types.

pub mod breakpoint;
pub mod capabilities;
pub mod client;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export key types for convenience.
pub use breakpoint::{Breakpoint, BreakpointManager};
pub use capabilities::DapCapabilities;
pub use client::{Inbound, ProtocolClient, RawWriter, ReplyReceiver};
pub use codec::{encode, MessageDecoder};
pub use error::DapError;
pub use protocol::*;
pub use transport::{
    AdapterCommand, ConnectionState, Endpoint, RetryPolicy, Transport, TransportEvent,
};
