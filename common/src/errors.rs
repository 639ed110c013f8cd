// Error handling framework

use thiserror::Error;

/// Callback registry and correlation errors
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store operation failed: {0}")]
    Store(String),
}

/// Errors raised by a registered completion action
#[derive(Error, Debug)]
#[error("Completion action failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Durable operation store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),
}

/// SFTP and blob transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unknown SFTP server: {0}")]
    UnknownServer(String),

    #[error("SFTP connection failed: {0}")]
    SftpConnectionFailed(String),

    #[error("SFTP authentication failed: {0}")]
    SftpAuthenticationFailed(String),

    #[error("SFTP operation failed: {0}")]
    SftpOperationFailed(String),

    #[error("SFTP file not found: {0}")]
    SftpFileNotFound(String),

    #[error("Blob storage operation failed: {0}")]
    BlobFailed(String),
}

/// External crypto service errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Token request failed: {0}")]
    TokenRequestFailed(String),

    #[error("No operation recorded for request id: {0}")]
    OperationNotFound(String),

    #[error("Encryption failed for {request_id}: {reason}")]
    EncryptionFailed { request_id: String, reason: String },

    #[error("Decryption failed for {request_id}: {reason}")]
    DecryptionFailed { request_id: String, reason: String },

    #[error("No token available for request id: {0}")]
    TokenMissing(String),

    #[error("Decrypt wait timed out after {0} seconds")]
    WaitTimeout(u64),

    #[error("Upload failed: {0}")]
    UploadFailed(String),
}

/// Response and report file parsing errors
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("File content is not valid UTF-8: {0}")]
    InvalidEncoding(String),

    #[error("Malformed {file_kind} content: {reason}")]
    Malformed { file_kind: String, reason: String },
}

/// Status application errors (downstream record updates)
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Record update failed: {0}")]
    UpdateFailed(String),

    #[error("No matching record: {0}")]
    NoMatch(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("23505") {
                    StoreError::DuplicateRequestId(db_err.message().to_string())
                } else {
                    StoreError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<StoreError> for CallbackError {
    fn from(err: StoreError) -> Self {
        CallbackError::Store(err.to_string())
    }
}

impl From<StoreError> for CryptoError {
    fn from(err: StoreError) -> Self {
        match err {
            // A callback for an unknown operation is a correlation miss,
            // not an internal failure; callers answer it differently
            StoreError::NotFound(id) => CryptoError::OperationNotFound(id),
            other => CryptoError::TokenRequestFailed(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApplyError {
    fn from(err: sqlx::Error) -> Self {
        ApplyError::UpdateFailed(err.to_string())
    }
}
