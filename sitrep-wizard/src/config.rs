//! Configuration resolution for sitrep-wizard
//!
//! Every setting resolves CLI → ENV → TOML → compiled default.

use sitrep_common::config::{resolve_setting, CompiledDefaults, RootFolderResolver, TomlConfig};
use sitrep_common::time::millis_to_duration;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const API_URL_ENV: &str = "SITREP_API_URL";
pub const API_TOKEN_ENV: &str = "SITREP_API_TOKEN";
pub const REQUEST_TIMEOUT_ENV: &str = "SITREP_REQUEST_TIMEOUT_SECS";
pub const AUTOSAVE_DEBOUNCE_ENV: &str = "SITREP_AUTOSAVE_DEBOUNCE_MS";
pub const ENTITY_CACHE_TTL_ENV: &str = "SITREP_ENTITY_CACHE_TTL_SECS";
pub const LISTEN_ENV: &str = "SITREP_LISTEN";

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_base_url: Option<String>,
    pub auth_token: Option<String>,
    pub listen: Option<String>,
    pub root_folder: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WizardConfig {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub autosave_debounce: Duration,
    pub entity_cache_ttl: Duration,
    pub listen: String,
    pub root_folder: PathBuf,
}

impl WizardConfig {
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Self {
        let defaults = CompiledDefaults::for_current_platform();

        let api_base_url = resolve_setting(
            cli.api_base_url.clone(),
            API_URL_ENV,
            toml.api_base_url.clone(),
            defaults.api_base_url,
        );

        // No compiled default: an empty value means "no token"
        let auth_token = Some(resolve_setting(
            cli.auth_token.clone(),
            API_TOKEN_ENV,
            toml.auth_token.clone(),
            String::new(),
        ))
        .filter(|t| !t.trim().is_empty());

        let request_timeout_secs = resolve_setting(
            None,
            REQUEST_TIMEOUT_ENV,
            toml.request_timeout_secs,
            defaults.request_timeout_secs,
        );
        let autosave_debounce_ms = resolve_setting(
            None,
            AUTOSAVE_DEBOUNCE_ENV,
            toml.autosave_debounce_ms,
            defaults.autosave_debounce_ms,
        );
        let entity_cache_ttl_secs = resolve_setting(
            None,
            ENTITY_CACHE_TTL_ENV,
            toml.entity_cache_ttl_secs,
            defaults.entity_cache_ttl_secs,
        );
        let listen = resolve_setting(cli.listen.clone(), LISTEN_ENV, toml.listen.clone(), defaults.listen);

        let root_folder =
            RootFolderResolver::new("sitrep-wizard").resolve(cli.root_folder.as_deref(), toml);

        let config = Self {
            api_base_url,
            auth_token,
            request_timeout: Duration::from_secs(request_timeout_secs),
            autosave_debounce: millis_to_duration(autosave_debounce_ms),
            entity_cache_ttl: Duration::from_secs(entity_cache_ttl_secs),
            listen,
            root_folder,
        };
        info!(
            api = %config.api_base_url,
            token = config.auth_token.is_some(),
            debounce_ms = autosave_debounce_ms,
            root_folder = %config.root_folder.display(),
            "Resolved configuration"
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            API_URL_ENV,
            API_TOKEN_ENV,
            REQUEST_TIMEOUT_ENV,
            AUTOSAVE_DEBOUNCE_ENV,
            ENTITY_CACHE_TTL_ENV,
            LISTEN_ENV,
            sitrep_common::config::ROOT_FOLDER_ENV,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = WizardConfig::resolve(&CliOverrides::default(), &TomlConfig::default());

        assert_eq!(config.api_base_url, "http://127.0.0.1:8000/api");
        assert_eq!(config.auth_token, None);
        assert_eq!(config.autosave_debounce, Duration::from_secs(10));
        assert_eq!(config.entity_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_priority_cli_env_toml() {
        clear_env();
        let toml = TomlConfig {
            api_base_url: Some("http://toml/api".to_string()),
            autosave_debounce_ms: Some(2000),
            listen: Some("0.0.0.0:9000".to_string()),
            ..Default::default()
        };
        std::env::set_var(API_URL_ENV, "http://env/api");
        std::env::set_var(AUTOSAVE_DEBOUNCE_ENV, "500");

        let cli = CliOverrides {
            api_base_url: Some("http://cli/api".to_string()),
            ..Default::default()
        };
        let config = WizardConfig::resolve(&cli, &toml);
        clear_env();

        assert_eq!(config.api_base_url, "http://cli/api");
        assert_eq!(config.autosave_debounce, Duration::from_millis(500));
        assert_eq!(config.listen, "0.0.0.0:9000");
    }

    #[test]
    #[serial]
    fn test_blank_token_means_none() {
        clear_env();
        std::env::set_var(API_TOKEN_ENV, "   ");
        let config = WizardConfig::resolve(&CliOverrides::default(), &TomlConfig::default());
        clear_env();

        assert_eq!(config.auth_token, None);
    }
}
