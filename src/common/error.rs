use crate::common::Rid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("No free buffer frame")]
    NoFreeFrame,

    #[error("Page {0} is full")]
    PageFull(u32),

    #[error("Record {0} not found")]
    RecordNotFound(Rid),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Column {0} not found")]
    ColumnNotFound(String),

    #[error("Incompatible types: {0} vs {1}")]
    IncompatibleType(String, String),

    #[error("Duplicate key in unique index {0}")]
    DuplicateKey(String),

    #[error("Index {0} not found")]
    IndexNotFound(String),

    #[error("Lock wait timed out")]
    LockTimeout,

    #[error("Transaction aborted")]
    TransactionAborted,

    #[error("Transaction chosen as deadlock victim")]
    DeadlockVictim,

    #[error("Log corrupt, tail truncated")]
    LogCorrupt,

    #[error("Log header unrecoverable")]
    LogUnrecoverable,

    #[error("Deserialization error")]
    Deserialization,

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
