use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Directory holding a project's config overlay.
pub const PROJECT_CONFIG_DIR: &str = ".pydbg";

const CONFIG_FILE: &str = "config.toml";

/// Content written into a newly-created global config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# pydbg configuration
# Uncomment and edit settings below to override defaults.

# [adapter]
# interpreter = "python3"
# host = "127.0.0.1"
# port = 5679
# connect_interval_ms = 100
# connect_attempts = 10
# stop_policy = "optimistic"    # or "acknowledged"

# [session]
# disconnect_timeout_ms = 2000
# just_my_code = true

# [log]
# level = "info"
# file = "/path/to/pydbg.log"
"#;

/// Load and merge configuration.
///
/// 1. Reads `config_dir/config.toml`, creating it with commented-out
///    defaults when it does not exist.
/// 2. Looks for `.pydbg/config.toml` from `project_dir` upward.
/// 3. Merges `Config::default() <- global <- project` and validates.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let global_path = config_dir.join(CONFIG_FILE);

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }
    if !global_path.exists() {
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!("Created default config at {}", global_path.display());
    }

    let mut config = Config::default();

    let global_content = std::fs::read_to_string(&global_path)?;
    if has_non_comment_content(&global_content) {
        config = merge_configs(&config, &global_content)?;
    }

    if let Some(project_path) = project_dir.and_then(find_project_config) {
        tracing::debug!("Merging project config {}", project_path.display());
        let project_content = std::fs::read_to_string(&project_path)?;
        config = merge_configs(&config, &project_content)?;
    }

    check(config)
}

/// Parse a TOML string directly into a validated [`Config`].
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    check(config)
}

/// Validate, logging every violation and returning the first.
fn check(config: Config) -> Result<Config, ConfigError> {
    match validate(&config) {
        Ok(()) => Ok(config),
        Err(errors) => {
            for err in &errors {
                tracing::warn!("{err}");
            }
            Err(errors
                .into_iter()
                .next()
                .unwrap_or_else(|| ConfigError::Validation {
                    field: "unknown".to_string(),
                    message: "validation failed".to_string(),
                }))
        }
    }
}

/// Walk from `start` upward looking for `.pydbg/config.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_DIR).join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn has_non_comment_content(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}
