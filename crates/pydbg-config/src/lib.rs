//! pydbg-config: layered TOML configuration for pydbg.

pub mod config;
pub mod error;
pub mod load;
pub mod merge;
pub mod validate;

pub use config::{AdapterConfig, Config, LogConfig, LogLevel, SessionConfig, StopPolicySetting};
pub use error::ConfigError;
pub use load::{load_config, load_from_str, PROJECT_CONFIG_DIR};
