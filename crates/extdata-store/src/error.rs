use thiserror::Error;

/// Errors that can occur while reading or writing the durable cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (creating the store directory).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored row could not be interpreted.
    #[error("invalid cache record: {0}")]
    InvalidRecord(String),
}
