//! Top-level error types for Chadburn.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Distinguished sentinel set by the overlap middleware when a tick is
    /// gated because a previous run is still in flight. Not a failure.
    #[error("skipped execution")]
    Skipped,

    #[error("exec returned exit code -1, maybe wrong user?")]
    UnexpectedExit,

    #[error("non-zero exit code: {0}")]
    ExitCode(i64),

    #[error("timeout waiting for service {0} to complete")]
    ServiceTimeout(String),

    #[error("unable to add a job with an empty schedule")]
    EmptySchedule,

    #[error("unable to start an empty scheduler")]
    EmptyScheduler,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Error::Skipped)
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown job kind: {0}")]
    UnknownKind(String),

    #[error("invalid schedule {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime endpoint cannot be reached (connection refused, EOF).
    /// Background loops retry this with exponential backoff.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("runtime error: {0}")]
    Api(String),
}

impl RuntimeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }
}
