//! Crate-wide error type.

use thiserror::Error;

/// Shorthand for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the queue, its clients and the functions.
#[derive(Error, Debug)]
pub enum Error {
    /// The queue or alarm tables could not be read or written.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An AWS call (Secrets Manager, Bedrock, Polly, Lambda) failed.
    #[error("aws error: {0}")]
    Aws(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input or model output did not have the expected shape.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The object storage API rejected an upload.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed json: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Database(e) if is_transient(e) => 503,
            _ => 500,
        }
    }

    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(e) => is_transient(e),
            Error::Aws(_) | Error::Storage(_) => true,
            _ => false,
        }
    }
}

/// Connection-level failures. Decode, schema and constraint errors are not
/// transient and will fail the same way on every retry.
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed
    )
}
