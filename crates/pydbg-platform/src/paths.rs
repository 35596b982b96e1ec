use std::path::{Path, PathBuf};

use crate::error::PlatformError;

/// Directory and file stem used for everything pydbg writes.
pub const APP_NAME: &str = "pydbg";

/// Standard directory paths for pydbg.
pub trait PlatformPaths: Send + Sync {
    /// Returns the configuration directory (`~/.config/pydbg`).
    fn config_dir(&self) -> PathBuf;
    /// Returns the data directory (`~/.local/share/pydbg`).
    fn data_dir(&self) -> PathBuf;
    /// Returns the log directory (`<data_dir>/logs`).
    fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
    /// Returns the default log file (`<log_dir>/pydbg.log`).
    fn log_file(&self) -> PathBuf {
        self.log_dir().join(format!("{APP_NAME}.log"))
    }
}

/// [`PlatformPaths`] rooted at the user's home directory.
pub struct DefaultPaths {
    home: PathBuf,
}

impl DefaultPaths {
    /// Resolves the home directory via `dirs`, falling back to `$HOME`.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Path` if neither is available.
    pub fn new() -> Result<Self, PlatformError> {
        let home = dirs::home_dir()
            .or_else(|| std::env::var("HOME").ok().map(PathBuf::from))
            .ok_or_else(|| PlatformError::Path("could not determine home directory".into()))?;
        Ok(Self { home })
    }

    /// Paths rooted at an explicit directory instead of the home directory.
    pub fn with_home(home: impl AsRef<Path>) -> Self {
        Self {
            home: home.as_ref().to_path_buf(),
        }
    }
}

impl PlatformPaths for DefaultPaths {
    fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join(APP_NAME)
    }

    fn data_dir(&self) -> PathBuf {
        self.home.join(".local").join("share").join(APP_NAME)
    }
}
