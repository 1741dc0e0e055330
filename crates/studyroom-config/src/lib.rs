//! Study room configuration system.
//!
//! Provides TOML-based configuration with full validation. All config
//! sections use sensible defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use studyroom_config::{config_to_json, load_config};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{StudyroomConfig, CONFIG_SCHEMA_VERSION};

use std::path::Path;
use studyroom_common::ConfigError;

/// Environment variable holding the Supabase project reference.
pub const ENV_PROJECT_REF: &str = "SUPABASE_PROJECT_REF";
/// Environment variable holding the Supabase anon key.
pub const ENV_API_KEY: &str = "SUPABASE_ANON_KEY";
/// Environment variable holding a user JWT.
pub const ENV_ACCESS_TOKEN: &str = "SUPABASE_ACCESS_TOKEN";

/// Load config from the platform default path, apply environment
/// overrides, and validate the result.
pub fn load_config() -> Result<StudyroomConfig, ConfigError> {
    let mut config = toml_loader::load_default()?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validation::validate(&config)?;
    Ok(config)
}

/// Same as [`load_config`] but reading an explicit file.
pub fn load_config_from(path: &Path) -> Result<StudyroomConfig, ConfigError> {
    let mut config = toml_loader::load_from_path(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validation::validate(&config)?;
    Ok(config)
}

/// Fill relay credentials from the environment. Non-empty variables win
/// over file values.
pub fn apply_env_overrides<F>(config: &mut StudyroomConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(project_ref) = non_empty(ENV_PROJECT_REF) {
        config.relay.project_ref = project_ref;
    }
    if let Some(api_key) = non_empty(ENV_API_KEY) {
        config.relay.api_key = api_key;
    }
    if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
        config.relay.access_token = Some(token);
    }
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &StudyroomConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
