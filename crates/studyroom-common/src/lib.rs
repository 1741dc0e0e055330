pub mod errors;
pub mod id;

pub use errors::{ConfigError, StudyroomError};
pub use id::{new_correlation_id, new_id, ParticipantId, SessionId};

pub type Result<T> = std::result::Result<T, StudyroomError>;
