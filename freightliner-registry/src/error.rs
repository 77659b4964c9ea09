use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    Corruption,
    TransientNetwork,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Corruption => "corruption",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("digest mismatch for {digest}: expected {expected}, got {actual}")]
    Corruption { digest: String, expected: String, actual: String },

    #[error("transient network error: {0}")]
    TransientNetwork(#[source] reqwest::Error),

    #[error("rate limited by {registry}, resets at {reset_at}")]
    RateLimited {
        registry: String,
        reset_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("registry returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Corruption { .. } => ErrorKind::Corruption,
            Error::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Error::RateLimited { .. } => ErrorKind::TransientNetwork,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Status { status, .. } if status.is_server_error() => ErrorKind::TransientNetwork,
            Error::Status { .. } => ErrorKind::InvalidInput,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::TransientNetwork(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
