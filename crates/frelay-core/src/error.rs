use thiserror::Error;

/// Errors produced by the relay protocol layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown command: {0}")]
    UnknownCommand(i32),

    #[error("unknown target session: {0}")]
    UnknownTarget(u64),

    #[error("duplicate handler registration for command {0}")]
    DuplicateRegistration(i32),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session {0} is closed")]
    SessionClosed(u64),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ciborium::de::Error<std::io::Error>> for RelayError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        RelayError::Malformed(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for RelayError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        RelayError::Malformed(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
