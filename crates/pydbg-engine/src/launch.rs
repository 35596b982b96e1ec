//! Launch configuration and the debugpy adapter command line.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use pydbg_dap::{AdapterCommand, Endpoint, RetryPolicy};

use crate::state::StopPolicy;

/// `adapterID` sent in `initialize`.
pub const ADAPTER_ID: &str = "python";
/// Host debugpy listens on by default.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Port debugpy listens on by default.
pub const DEFAULT_PORT: u16 = 5679;
/// How long a dying session waits for the adapter before killing it.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start one debug session.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    /// Python interpreter that runs debugpy.
    pub interpreter: PathBuf,
    /// Script to debug.
    pub script: PathBuf,
    /// Arguments passed to the script.
    pub args: Vec<String>,
    /// Working directory of the debuggee.
    pub working_dir: Option<PathBuf>,
    /// Extra environment for the debuggee.
    pub env: HashMap<String, String>,
    /// Host the adapter listens on.
    pub host: String,
    /// Port the adapter listens on.
    pub port: u16,
    /// Connect to an already running adapter instead of spawning one.
    pub attach_only: bool,
    /// Connect attempts and the pause between them.
    pub retry: RetryPolicy,
    /// How an interrupt is reported.
    pub stop_policy: StopPolicy,
    /// Grace period for `disconnect` before the adapter is killed.
    pub disconnect_timeout: Duration,
    /// Ask debugpy to step only through user code.
    pub just_my_code: bool,
}

impl LaunchConfig {
    /// Debug `script` with `interpreter`, using the default endpoint and
    /// policies.
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            attach_only: false,
            retry: RetryPolicy::default(),
            stop_policy: StopPolicy::default(),
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            just_my_code: true,
        }
    }

    /// Append arguments for the script.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the debuggee in `dir`.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set one environment variable for the debuggee.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Host and port the adapter listens on.
    pub fn endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Attach to an adapter that is already listening.
    pub fn attach_only(mut self, attach_only: bool) -> Self {
        self.attach_only = attach_only;
        self
    }

    /// Override the connect retry policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Choose how interrupts are confirmed.
    pub fn stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    /// Override the disconnect grace period.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Toggle debugpy's `justMyCode`.
    pub fn just_my_code(mut self, just_my_code: bool) -> Self {
        self.just_my_code = just_my_code;
        self
    }

    /// The socket the adapter listens on.
    pub fn adapter_endpoint(&self) -> Endpoint {
        Endpoint::Tcp {
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// `<interpreter> -Xfrozen_modules=off -m debugpy --listen HOST:PORT
    /// --wait-for-client <script> [args...]`, or `None` in attach mode.
    pub fn adapter_command(&self) -> Option<AdapterCommand> {
        if self.attach_only {
            return None;
        }
        let mut command = AdapterCommand::new(&self.interpreter)
            .args([
                "-Xfrozen_modules=off".to_string(),
                "-m".to_string(),
                "debugpy".to_string(),
                "--listen".to_string(),
                format!("{}:{}", self.host, self.port),
                "--wait-for-client".to_string(),
                self.script.to_string_lossy().into_owned(),
            ])
            .args(self.args.iter().cloned())
            .envs(self.env.clone());
        if let Some(dir) = &self.working_dir {
            command = command.current_dir(dir);
        }
        Some(command)
    }
}
