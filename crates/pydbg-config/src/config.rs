use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The level as a `tracing` filter directive.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// How an interrupt of the debuggee is confirmed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicySetting {
    /// Report the stop as soon as the pause is sent (debugpy default).
    #[default]
    Optimistic,
    /// Wait for the adapter's `stopped` event.
    Acknowledged,
}

/// Debug adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Python interpreter used to run debugpy.
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,
    /// Host debugpy listens on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port debugpy listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Delay between connection attempts (10–10000 ms).
    #[serde(default = "default_connect_interval_ms")]
    pub connect_interval_ms: u64,
    /// Connection attempts before giving up (1–100).
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default)]
    pub stop_policy: StopPolicySetting,
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python3")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5679
}
fn default_connect_interval_ms() -> u64 {
    100
}
fn default_connect_attempts() -> u32 {
    10
}

impl AdapterConfig {
    /// Pause between connect attempts.
    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            host: default_host(),
            port: default_port(),
            connect_interval_ms: default_connect_interval_ms(),
            connect_attempts: default_connect_attempts(),
            stop_policy: StopPolicySetting::Optimistic,
        }
    }
}

/// Session behaviour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to wait for the adapter to disconnect (100–60000 ms).
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,
    /// Step only through user code.
    #[serde(default = "default_true")]
    pub just_my_code: bool,
}

fn default_disconnect_timeout_ms() -> u64 {
    2000
}
fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Grace period for the adapter to answer `disconnect`.
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            just_my_code: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Log file; the platform default when unset.
    pub file: Option<PathBuf>,
}

/// Top-level pydbg configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub log: LogConfig,
}
