use thiserror::Error;

/// Errors from loading, parsing, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The default config file could not be written.
    #[error("failed to create default config: {0}")]
    CreateDefault(String),

    /// TOML parsing or type conversion failed.
    #[error("TOML parse error: {0}")]
    Parse(String),

    /// A config value is out of range.
    #[error("validation error: {field}: {message}")]
    Validation {
        /// Dotted field path, e.g. `adapter.port`.
        field: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
