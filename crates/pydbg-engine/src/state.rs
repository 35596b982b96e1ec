//! Engine lifecycle states and stop policy.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`DebugSession`](crate::DebugSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineState {
    /// Created, waiting for `setup`.
    SetupRequested,
    /// Prerequisites checked and the transport started.
    EngineSetupOk,
    /// Setup failed. Terminal unless re-armed after a missing dependency.
    EngineSetupFailed,
    /// Waiting for the adapter handshake to finish.
    RunRequested,
    /// The debuggee is running.
    InferiorRunOk,
    /// A resume or step was sent and is not yet acknowledged.
    InferiorRunRequested,
    /// A pause was sent.
    InferiorStopRequested,
    /// The debuggee is stopped.
    InferiorStopOk,
    /// Shutting down.
    Dying,
    /// The session is over.
    Finished,
}

impl EngineState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::EngineSetupFailed | Self::Finished)
    }

    /// Whether the debuggee is attached, running or stopped.
    pub fn is_inferior_active(self) -> bool {
        matches!(
            self,
            Self::InferiorRunOk
                | Self::InferiorRunRequested
                | Self::InferiorStopRequested
                | Self::InferiorStopOk
        )
    }
}

/// How an interrupt is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// Report the stop as soon as `pause` is sent. debugpy does not always
    /// answer a pause with a `stopped` event.
    #[default]
    Optimistic,
    /// Wait for the adapter's `stopped` event.
    Acknowledged,
}
