//! Reading `config.toml` from disk, and seeding it on first run.

use std::path::{Path, PathBuf};

use studyroom_common::ConfigError;
use tracing::{info, warn};

use super::template::default_config_toml;
use crate::schema::StudyroomConfig;
use crate::validation;

const APP_DIR: &str = "studyroom";
const CONFIG_FILE: &str = "config.toml";

fn io_error(action: &str, path: &Path, e: std::io::Error) -> ConfigError {
    ConfigError::ParseError(format!("{action} {}: {e}", path.display()))
}

/// `<platform config dir>/studyroom/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|base| base.join(APP_DIR).join(CONFIG_FILE))
        .ok_or_else(|| ConfigError::ParseError("no platform config directory".into()))
}

/// Write the commented template to `path`, creating parent directories.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_error("cannot create", dir, e))?;
    }
    std::fs::write(path, default_config_toml()).map_err(|e| io_error("cannot write", path, e))?;
    info!(path = %path.display(), "Wrote default room config");
    Ok(())
}

/// Parse the room config at `path`.
///
/// Missing keys take their defaults. Out-of-range values only produce a
/// warning here; callers wanting a hard failure run `validation::validate`.
pub fn load_from_path(path: &Path) -> Result<StudyroomConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(io_error("cannot read", path, e)),
    };

    let config = toml::from_str::<StudyroomConfig>(&text)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    if let Err(problems) = validation::validate(&config) {
        warn!(path = %path.display(), "Config has out-of-range values: {problems}");
    }
    info!(path = %path.display(), "Loaded room config");
    Ok(config)
}

/// Load from [`default_config_path`], seeding the template when absent.
pub fn load_default() -> Result<StudyroomConfig, ConfigError> {
    let path = default_config_path()?;
    load_from_path(&path).or_else(|e| match e {
        ConfigError::FileNotFound(_) => {
            create_default_config(&path)?;
            Ok(StudyroomConfig::default())
        }
        other => Err(other),
    })
}
