//! Session engine error types.

use std::path::PathBuf;

use pydbg_dap::DapError;
use thiserror::Error;

use crate::state::EngineState;

/// Errors returned by [`DebugSession`](crate::DebugSession) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The script to debug is missing or not a readable file.
    #[error("Cannot open script file {}", path.display())]
    ScriptUnreadable {
        /// The configured script path.
        path: PathBuf,
    },

    /// A package the adapter needs is not importable by the interpreter.
    #[error("{package} is not available for {}", interpreter.display())]
    MissingDependency {
        /// The interpreter that was checked.
        interpreter: PathBuf,
        /// The missing package.
        package: String,
    },

    /// An operation was attempted from a state that does not allow it.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the session was in.
        state: EngineState,
    },

    /// Transport or protocol failure.
    #[error(transparent)]
    Dap(#[from] DapError),
}
