use std::sync::Arc;

/// The failure categories a reader can report.
///
/// Every [`CacheError`] maps onto exactly one kind; the local listener only
/// needs the kind to pick an outbound status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfRange,
    Protocol,
    Network,
    Io,
    Cancelled,
}

impl ErrorKind {
    /// HTTP status a listener should answer with for this kind of failure.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::OutOfRange => 416,
            ErrorKind::Protocol => 502,
            ErrorKind::Network => 504,
            ErrorKind::Io => 500,
            // nginx-style "client closed request"
            ErrorKind::Cancelled => 499,
        }
    }
}

// Custom error type for cache operations
#[derive(Debug, thiserror::Error, Clone)]
pub enum CacheError {
    #[error("Requested offset {offset} is beyond content length {content_length}")]
    OutOfRange { offset: u64, content_length: u64 },

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Origin content changed: expected validator {expected}, got {actual}")]
    ValidatorMismatch { expected: String, actual: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: Arc<reqwest::Error>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Reader is closed")]
    Closed,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::OutOfRange { .. } | CacheError::InvalidRange(_) => ErrorKind::OutOfRange,
            CacheError::Protocol(_)
            | CacheError::ValidatorMismatch { .. }
            | CacheError::InvalidUrl(_) => ErrorKind::Protocol,
            CacheError::Network(_) | CacheError::Http { .. } => ErrorKind::Network,
            CacheError::Io { .. } => ErrorKind::Io,
            CacheError::Cancelled | CacheError::Closed => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        CacheError::Protocol(msg.into())
    }
}

// Manual implementation of From<reqwest::Error> for CacheError
// because of the Arc wrapping.
impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Http {
            source: Arc::new(err),
        }
    }
}

// Manual implementation of From<std::io::Error> for CacheError
impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io {
            source: Arc::new(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
