pub mod error;
pub mod logging;
pub mod paths;

pub use error::PlatformError;
pub use logging::{
    ensure_log_dir, log_level_to_filter, rotate_log_files, DEFAULT_MAX_LOG_FILES,
    DEFAULT_MAX_LOG_SIZE,
};
pub use paths::{DefaultPaths, PlatformPaths, APP_NAME};
