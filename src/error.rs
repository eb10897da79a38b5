use thiserror::Error;

/// Failure conditions surfaced by the client core.
///
/// `Unauthorized` and `InvalidArgument` are raised before any local state is touched.
/// `Transient` and `SessionExpired` come back from the remote and, for optimistic actions,
/// are returned only after the local change has been rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Sign in required")]
    Unauthorized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Remote validation or conflict (duplicate account, bad credentials, ...).
    #[error("{message} (status {status})")]
    Rejected { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Transient(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("An action is already pending for series {0}")]
    Pending(String),
}

impl Error {
    /// Whether the caller can simply show a notice and carry on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::SessionExpired | Error::Malformed(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
