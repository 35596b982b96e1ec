//! pydbg-engine: the Python debug session engine.
//!
//! Drives one debugpy session from setup to teardown on top of
//! `pydbg-dap`: prerequisite checks, adapter launch, the DAP handshake,
//! stop/resume/step, breakpoints and inspection, and shutdown.

pub mod error;
pub mod launch;
pub mod notify;
pub mod prerequisite;
pub mod session;
pub mod state;

pub use error::EngineError;
pub use launch::{LaunchConfig, ADAPTER_ID, DEFAULT_HOST, DEFAULT_PORT};
pub use notify::{Notification, NotificationSink};
pub use prerequisite::{PrerequisiteCache, RemediationAction, DEBUGPY_PACKAGE};
pub use session::DebugSession;
pub use state::{EngineState, StopPolicy};
