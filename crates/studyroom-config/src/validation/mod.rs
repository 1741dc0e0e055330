//! Full configuration validation.
//!
//! Validates numeric ranges and a few cross-field rules. Each section has a
//! validator; this orchestrator calls them all and collects errors into a
//! single `ConfigError`.

mod helpers;
mod sections;

#[cfg(test)]
mod tests;

use crate::schema::StudyroomConfig;
use studyroom_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &StudyroomConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    sections::validate_relay(&mut errors, config);
    sections::validate_ice(&mut errors, config);
    sections::validate_media(&mut errors, config);
    sections::validate_negotiation(&mut errors, config);
    sections::validate_chat(&mut errors, config);
    sections::validate_membership(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
