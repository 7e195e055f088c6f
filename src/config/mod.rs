//! Configuration loading.
//!
//! Settings come from an INI-style file named by `IDMTOOLS_CONFIG_FILE`,
//! falling back to `idmtools.ini` in the working directory when present.
//! Unknown keys are tolerated so config files can be shared with other
//! tools in the family.
//!
//! ## Precedence
//!
//! CLI flag > config file > built-in default.

use crate::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_FILE_ENV: &str = "IDMTOOLS_CONFIG_FILE";
/// Default config filename probed in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "idmtools.ini";

/// Top-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(alias = "Logging")]
    pub logging: LoggingSettings,
    #[serde(alias = "Platform")]
    pub platform: PlatformSettings,
}

/// The `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Console log level.
    pub level: String,
    /// File log level; usually more verbose than the console.
    pub file_level: String,
    /// Log filename, created next to the working directory.
    pub filename: String,
    /// Whether diagnostics also go to the console.
    pub console: bool,
    /// Master switch for the log file.
    pub enable_file_logging: bool,
    /// Whether user-facing output is printed at all.
    pub user_output: bool,
    /// ANSI colors on console output.
    pub use_colored_logs: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file_level: "DEBUG".to_string(),
            filename: "idmtools.log".to_string(),
            console: false,
            enable_file_logging: true,
            user_output: true,
            use_colored_logs: true,
        }
    }
}

/// The `[platform]` section: defaults applied to filesystem-family
/// backends unless overridden per run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    /// Job directory root.
    pub job_directory: Option<PathBuf>,
    /// Concurrent simulation bound for the local backend.
    pub max_jobs: usize,
    /// Symlink the `Assets` directory into simulations.
    pub sym_link: bool,
    /// MPI rank count.
    pub ntasks: usize,
    /// Container image for the container backend.
    pub image: Option<String>,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            job_directory: None,
            max_jobs: crate::platform::file::DEFAULT_MAX_JOBS,
            sym_link: true,
            ntasks: 1,
            image: None,
        }
    }
}

impl Settings {
    /// Load settings from the configured file, or defaults when no file
    /// is named and none is found in the working directory.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    /// Parse a specific config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|_| {
            crate::Error::NotFound(format!("config file {}", path.display()))
        })?;
        let settings: Settings = toml::from_str(&text)
            .map_err(|e| crate::Error::InvalidInput(format!("bad config file: {}", e)))?;
        Ok(settings)
    }
}
