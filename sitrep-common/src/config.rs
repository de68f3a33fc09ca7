//! Configuration loading and root folder resolution
//!
//! Every setting resolves in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file never stops startup: a warning is logged
//! and the compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Environment variable overriding the local state folder
pub const ROOT_FOLDER_ENV: &str = "SITREP_ROOT_FOLDER";

/// File name of the local SQLite database inside the root folder
pub const DATABASE_FILE_NAME: &str = "sitrep.db";

/// On-disk TOML configuration
///
/// All keys are optional; absent keys fall through to environment variables
/// and compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Local state folder (holds the SQLite database)
    #[serde(default)]
    pub root_folder: Option<String>,
    /// Base URL of the inspection backing store REST API
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Token sent as `Authorization: Token <value>`
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-request timeout for backing store calls
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Auto-save quiet period
    #[serde(default)]
    pub autosave_debounce_ms: Option<u64>,
    /// Broadcaster/Program cache lifetime
    #[serde(default)]
    pub entity_cache_ttl_secs: Option<u64>,
    /// Local HTTP API listen address
    #[serde(default)]
    pub listen: Option<String>,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default `tracing` filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub autosave_debounce_ms: u64,
    pub entity_cache_ttl_secs: u64,
    pub listen: String,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was built for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            api_base_url: "http://127.0.0.1:8000/api".to_string(),
            request_timeout_secs: 30,
            autosave_debounce_ms: 10_000,
            entity_cache_ttl_secs: 300,
            listen: "127.0.0.1:5740".to_string(),
            log_level: default_log_level(),
        }
    }
}

/// Get OS-dependent default local state folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/sitrep
        dirs::data_local_dir()
            .map(|d| d.join("sitrep"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/sitrep"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/sitrep
        dirs::data_dir()
            .map(|d| d.join("sitrep"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/sitrep"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\sitrep
        dirs::data_local_dir()
            .map(|d| d.join("sitrep"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\sitrep"))
    } else {
        PathBuf::from("./sitrep_data")
    }
}

/// Default TOML path for a module: `<config dir>/sitrep/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sitrep").join(format!("{}.toml", module_name)))
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load the TOML config, degrading to an empty config on any problem
pub fn load_toml_config_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        debug!("No config file location available, using defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        debug!("Config file not found: {}, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; continuing with defaults", e);
            TomlConfig::default()
        }
    }
}

/// Resolve one setting from CLI → ENV → TOML → default
///
/// An environment value that does not parse is ignored with a warning.
pub fn resolve_setting<T>(cli: Option<T>, env_var: &str, toml_value: Option<T>, default: T) -> T
where
    T: FromStr,
{
    if let Some(value) = cli {
        return value;
    }

    if let Ok(raw) = std::env::var(env_var) {
        match raw.trim().parse::<T>() {
            Ok(value) => return value,
            Err(_) => warn!("Ignoring unparsable value in {}: {:?}", env_var, raw),
        }
    }

    toml_value.unwrap_or(default)
}

/// Local state folder resolution following CLI → ENV → TOML → default
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    /// Resolve the root folder
    pub fn resolve(&self, cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return PathBuf::from(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &toml_config.root_folder {
            return PathBuf::from(path);
        }

        // Priority 4: compiled default
        debug!(module = %self.module_name, "Using compiled default root folder");
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder on first run and locates files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            tracing::info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    /// Path of the local SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}
