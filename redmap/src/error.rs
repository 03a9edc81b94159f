use std::sync::PoisonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Association not found: {0}")]
    AssociationNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid model encoding: {0}")]
    InvalidModelEncoding(String),

    #[error("Corrupt record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Query not supported: {0}")]
    QueryNotSupported(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serde error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl AppError {
    /// True for the recoverable lookup failures callers are expected to branch on.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::RecordNotFound(_) | AppError::AssociationNotFound(_) | AppError::TableNotFound(_) | AppError::ClassNotFound(_)
        )
    }

    /// True when the failure came from the backing store rather than from the mapping layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::Connection(_)
                | AppError::Database(_)
                | AppError::RedbTransaction(_)
                | AppError::RedbStorage(_)
                | AppError::RedbTable(_)
                | AppError::RedbCommit(_)
                | AppError::Io(_)
        )
    }

    pub fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        AppError::CorruptRecord { key: key.into(), reason: reason.to_string() }
    }
}

impl<T> From<PoisonError<T>> for AppError
{
    fn from(e: PoisonError<T>) -> Self {
        AppError::Custom(format!("Poison error: {:?}", e.to_string()))
    }
}
