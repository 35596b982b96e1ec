//! DAP error types.

use thiserror::Error;

/// Errors from the transport, codec, and protocol client.
#[derive(Debug, Error)]
pub enum DapError {
    /// The adapter or debuggee executable could not be started.
    #[error("failed to launch {program}: {source}")]
    LaunchFailure {
        /// The executable that failed to start.
        program: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The connect retry budget was exhausted.
    #[error("could not connect to adapter after {attempts} attempts")]
    ConnectionFailed {
        /// Number of connection attempts made.
        attempts: u32,
    },

    /// A single inbound frame could not be decoded.
    ///
    /// When `fatal` is set the decoder could not find the next frame
    /// boundary and the connection has to be closed.
    #[error("protocol decode error: {reason}")]
    ProtocolDecode {
        /// What was wrong with the frame.
        reason: String,
        /// Whether the stream is unrecoverable.
        fatal: bool,
    },

    /// A response arrived for a sequence number nobody is waiting on.
    #[error("orphan response for request {request_seq}")]
    OrphanResponse {
        /// The unmatched `request_seq`.
        request_seq: i64,
    },

    /// The session ended before the request was answered.
    #[error("session terminated")]
    SessionTerminated,

    /// The adapter answered a request with `success: false`.
    #[error("adapter rejected {command}: {message}")]
    Rejected {
        /// The rejected command.
        command: String,
        /// The adapter's error message.
        message: String,
    },

    /// Arguments could not be converted to JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket or pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DapError {
    /// Build a recoverable decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::ProtocolDecode {
            reason: reason.into(),
            fatal: false,
        }
    }

    /// Whether this error means the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ProtocolDecode { fatal, .. } => *fatal,
            Self::OrphanResponse { .. } | Self::Rejected { .. } => false,
            _ => true,
        }
    }
}
