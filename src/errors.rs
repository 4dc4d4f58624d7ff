use thiserror::Error;

/// Convenience alias used across the crate.
pub type LicenceResult<T> = Result<T, LicenceError>;

/// Errors produced by the licence server.
#[derive(Debug, Error)]
pub enum LicenceError {
    /// A required string argument was empty or missing.
    #[error("invalid argument: {0} must not be empty")]
    InvalidArgument(&'static str),

    /// The product has no licence rows in the database.
    #[error("invalid product: '{0}'")]
    InvalidProduct(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A database statement failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// A licence file could not be read or parsed.
    #[error("licence file error: {0}")]
    LicenceFile(String),

    /// An XML document was structurally malformed.
    #[error("document error: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
