//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// The first six variants are the domain outcomes every operation may
/// surface to its caller. The rest are infrastructure failures raised by
/// the sequencer, storage, and configuration layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Non-positive amount, amount over the available balance, or a tick
    /// argument that is not strictly in the future
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Caller is not the ledger owner
    #[error("Owner only: {0}")]
    OwnerOnly(String),

    /// Caller lacks the recorder or reminder-owner privilege
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Withdrawal attempted before the applicable release tick
    #[error("Not unlocked: {0}")]
    NotUnlocked(String),

    /// Referenced principal or record has no data
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unrecognized filter or enum argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal invariant violation (balance partition, history chain)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (sequencer mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable numeric code for the error kind
    pub fn code(&self) -> u32 {
        match self {
            Error::OwnerOnly(_) => 100,
            Error::NotUnlocked(_) => 101,
            Error::InvalidAmount(_) => 102,
            Error::InvalidArgument(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// True for outcomes caused by the caller's request rather than the
    /// ledger's infrastructure
    pub fn is_rejection(&self) -> bool {
        self.code() < 500
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Config(format!("metrics registration failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::OwnerOnly("x".into()).code(), 100);
        assert_eq!(Error::NotUnlocked("x".into()).code(), 101);
        assert_eq!(Error::InvalidAmount("x".into()).code(), 102);
        assert_eq!(Error::InvalidArgument("x".into()).code(), 400);
        assert_eq!(Error::Unauthorized("x".into()).code(), 401);
        assert_eq!(Error::NotFound("x".into()).code(), 404);
        assert_eq!(Error::Storage("x".into()).code(), 500);
    }

    #[test]
    fn test_rejection_classification() {
        assert!(Error::NotFound("x".into()).is_rejection());
        assert!(!Error::Concurrency("closed".into()).is_rejection());
    }
}
