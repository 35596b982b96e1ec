use crate::config::Config;
use crate::error::ConfigError;

/// Validate a [`Config`], returning all detected violations.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, field: &str, message: String| {
        if !ok {
            errors.push(ConfigError::Validation {
                field: field.to_string(),
                message,
            });
        }
    };

    let adapter = &config.adapter;
    check(
        !adapter.interpreter.as_os_str().is_empty(),
        "adapter.interpreter",
        "must not be empty".to_string(),
    );
    check(
        !adapter.host.trim().is_empty(),
        "adapter.host",
        "must not be empty".to_string(),
    );
    check(adapter.port != 0, "adapter.port", "must not be 0".to_string());
    check(
        (10..=10_000).contains(&adapter.connect_interval_ms),
        "adapter.connect_interval_ms",
        format!("must be 10-10000, got {}", adapter.connect_interval_ms),
    );
    check(
        (1..=100).contains(&adapter.connect_attempts),
        "adapter.connect_attempts",
        format!("must be 1-100, got {}", adapter.connect_attempts),
    );
    check(
        (100..=60_000).contains(&config.session.disconnect_timeout_ms),
        "session.disconnect_timeout_ms",
        format!(
            "must be 100-60000, got {}",
            config.session.disconnect_timeout_ms
        ),
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
