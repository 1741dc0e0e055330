use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StudyroomError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session error: {0}")]
    Session(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("negotiation.timeout_secs = 0".into());
        assert_eq!(
            err.to_string(),
            "config validation error: negotiation.timeout_secs = 0"
        );
    }

    #[test]
    fn studyroom_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let err: StudyroomError = config_err.into();
        assert!(matches!(err, StudyroomError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn session_error_display() {
        let err = StudyroomError::Session("camera denied".into());
        assert_eq!(err.to_string(), "session error: camera denied");
    }
}
