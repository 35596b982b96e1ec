//! Host-visible notifications emitted by the engine.

use std::fmt;

use tokio::sync::mpsc;

use crate::prerequisite::RemediationAction;
use crate::state::EngineState;

/// Something the host should show or react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Informational message.
    Info(String),
    /// User-facing error.
    Error(String),
    /// A package the adapter needs is missing; `action` installs it.
    MissingDependency {
        package: String,
        message: String,
        action: RemediationAction,
    },
    /// Debuggee or adapter output.
    Output { category: String, text: String },
    /// The engine entered a new state.
    StateChanged(EngineState),
    /// The debuggee is stopped and can be inspected.
    StopOk,
    /// The debuggee exited.
    Exited { code: i64 },
    /// The adapter ended the session.
    Terminated,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info(msg) | Self::Error(msg) => f.write_str(msg),
            Self::MissingDependency { message, .. } => f.write_str(message),
            Self::Output { text, .. } => f.write_str(text),
            Self::StateChanged(state) => write!(f, "state: {state:?}"),
            Self::StopOk => f.write_str("Debuggee stopped"),
            Self::Exited { code } => write!(f, "Debuggee exited with code {code}"),
            Self::Terminated => f.write_str("Debug session terminated"),
        }
    }
}

/// Receiver of engine notifications.
pub trait NotificationSink {
    fn notify(&mut self, notification: Notification);
}

impl NotificationSink for Vec<Notification> {
    fn notify(&mut self, notification: Notification) {
        self.push(notification);
    }
}

impl NotificationSink for mpsc::UnboundedSender<Notification> {
    fn notify(&mut self, notification: Notification) {
        if self.send(notification).is_err() {
            tracing::trace!("notification receiver dropped");
        }
    }
}

impl<T: NotificationSink + ?Sized> NotificationSink for &mut T {
    fn notify(&mut self, notification: Notification) {
        (**self).notify(notification);
    }
}

impl<T: NotificationSink + ?Sized> NotificationSink for Box<T> {
    fn notify(&mut self, notification: Notification) {
        (**self).notify(notification);
    }
}
