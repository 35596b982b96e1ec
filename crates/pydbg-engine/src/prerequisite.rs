//! Adapter prerequisite probing and the install remediation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::notify::{Notification, NotificationSink};

/// Package providing the Python debug adapter.
pub const DEBUGPY_PACKAGE: &str = "debugpy";

/// Remembers which (interpreter, package) pairs are known to import.
///
/// Only positive results are kept, so a package installed after a failed
/// check is picked up by the next one.
#[derive(Debug, Default)]
pub struct PrerequisiteCache {
    verified: HashSet<(PathBuf, String)>,
}

impl PrerequisiteCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `package` is already known to import with `interpreter`.
    pub fn is_verified(&self, interpreter: &Path, package: &str) -> bool {
        self.verified
            .contains(&(interpreter.to_path_buf(), package.to_string()))
    }

    /// Record `package` as importable with `interpreter`.
    pub fn mark_verified(&mut self, interpreter: impl Into<PathBuf>, package: impl Into<String>) {
        self.verified.insert((interpreter.into(), package.into()));
    }

    /// Check that `interpreter -c "import <package>"` succeeds.
    pub async fn check(&mut self, interpreter: &Path, package: &str) -> bool {
        if self.is_verified(interpreter, package) {
            return true;
        }
        let available = import_succeeds(interpreter, package).await;
        if available {
            self.mark_verified(interpreter, package);
        }
        available
    }
}

async fn import_succeeds(interpreter: &Path, package: &str) -> bool {
    let status = Command::new(interpreter)
        .arg("-c")
        .arg(format!("import {package}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(status) => {
            tracing::debug!(interpreter = %interpreter.display(), package, %status, "prerequisite import check");
            status.success()
        }
        Err(e) => {
            tracing::debug!(interpreter = %interpreter.display(), "cannot run interpreter: {e}");
            false
        }
    }
}

/// Installs a missing package with pip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationAction {
    pub interpreter: PathBuf,
    pub package: String,
}

impl RemediationAction {
    /// `pip install` `package` into `interpreter`'s environment.
    pub fn install(interpreter: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            package: package.into(),
        }
    }

    /// Button text for hosts that offer the action.
    pub fn label(&self) -> String {
        format!("Install {}", self.package)
    }

    /// Arguments passed to the interpreter.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-m".into(),
            "pip".into(),
            "install".into(),
            self.package.clone(),
        ]
    }

    /// Run the install and report the outcome to `sink`.
    pub async fn run<S: NotificationSink>(&self, sink: &mut S) {
        tracing::info!(interpreter = %self.interpreter.display(), package = %self.package, "installing");
        let output = Command::new(&self.interpreter)
            .args(self.args())
            .stdin(Stdio::null())
            .output()
            .await;
        let notification = match output {
            Ok(out) if out.status.success() => Notification::Info(format!(
                "Python debugger: {} package installed.",
                self.package
            )),
            Ok(out) => Notification::Error(format!(
                "Python debugger: {} package installation failed: {}",
                self.package,
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            Err(e) => Notification::Error(format!(
                "Python debugger: {} package installation failed: {e}",
                self.package
            )),
        };
        sink.notify(notification);
    }

    /// Run the install on a background task. The sink is handed back when
    /// the task finishes.
    pub fn spawn<S>(self, mut sink: S) -> JoinHandle<S>
    where
        S: NotificationSink + Send + 'static,
    {
        tokio::spawn(async move {
            self.run(&mut sink).await;
            sink
        })
    }
}
